#[path = "../../tests/common/mod.rs"]
mod common;
use common::*;
use canhubd::CanServer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter("trace").init();
    let mut server = CanServer::new();
    let (id, addr) = start_network(&mut server).await;
    eprintln!("connecting a (no interface)");
    let mut a = connect_client(addr).await;
    eprintln!("a connected, connecting b");
    let mut b = connect_client(addr).await;
    eprintln!("b connected");
}
