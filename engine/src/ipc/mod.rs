pub mod dispatch;
pub mod server;

pub use server::IpcServer;
