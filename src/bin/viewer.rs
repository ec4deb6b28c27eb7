use view_ngin::{config::ViewerConfig, flow};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = ViewerConfig::from_args(std::env::args());
    flow::run(config)
}
