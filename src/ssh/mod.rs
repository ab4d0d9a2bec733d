pub mod dispatcher;
pub mod forward;
pub mod handler;
pub mod keys;
pub mod request;
pub mod scp;
pub mod session;
