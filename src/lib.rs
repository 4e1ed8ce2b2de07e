mod byte_stream;
mod config;
mod connection;
mod reassembler;
mod receiver;
mod segment;
mod sender;
mod state;
mod timer;
mod wrapping;

pub use byte_stream::*;
pub use config::*;
pub use connection::*;
pub use reassembler::*;
pub use receiver::*;
pub use segment::*;
pub use sender::*;
pub use state::*;
pub use timer::*;
pub use wrapping::*;
