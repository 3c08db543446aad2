//! Remote API surface: error taxonomy, response envelope decoding, and the
//! transport seam used by the dispatcher and the sync engine.

pub mod envelope;
pub mod error;
pub mod transport;

pub use envelope::classify_response;
pub use error::ApiError;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};
