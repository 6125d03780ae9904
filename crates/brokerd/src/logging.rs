//! Structured stderr logging: an `EnvFilter` built from `RUST_LOG` with a
//! `warn` default, writing through `tracing-subscriber`'s `fmt` layer.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn install() {
    let fmt_layer = tracing_subscriber::fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        );

    tracing_subscriber::registry().with(fmt_layer).init();
}
