pub mod tcp;
pub mod traits;

pub use tcp::{TcpConnector, TcpTransportStream, DEFAULT_CONNECT_TIMEOUT};
pub use traits::{TransportConnector, TransportStream};
