#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

#[tokio::main]
async fn main() -> Result<(), wikimatch_server::ServerError> {
    pretty_env_logger::init_custom_env("RUST_LOG");
    wikimatch_server::run().await
}
