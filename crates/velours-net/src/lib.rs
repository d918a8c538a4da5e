// Transport seam between the conversation core and the wire layer.
//
// The actual encrypted transport lives outside this workspace; everything
// here is the typed boundary the core programs against.

pub mod error;
pub mod payload;
pub mod transport;

pub use error::SendError;
pub use payload::{MessagePayload, ReceiptBatch};
pub use transport::Messaging;
