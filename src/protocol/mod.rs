pub mod codec;
pub mod headers;
pub mod types;

pub use codec::{encode_request, read_response, write_request, ReadResponse, WireError};
pub use headers::HeaderMultiMap;
pub use types::{Origin, Request, Response, Version};
