mod convert;
mod server;

#[allow(clippy::all)]
pub mod gen {
    tonic::include_proto!("bosun.controller");
}

pub use server::{serve, ControllerServer};
