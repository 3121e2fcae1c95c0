mod app;
mod buffer;
mod checksum;
mod iface;
mod packet;
mod prefix;
mod worker;

fn main() {
    if let Err(err) = app::run() {
        tracing::error!(%err, "routechain exiting");
        std::process::exit(1);
    }
}
