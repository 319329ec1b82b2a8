pub mod time;

use tracing_subscriber::EnvFilter;

use crate::simulator::types::Price;

/// Install the global `fmt` subscriber; `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Render a price for logs and the client CLI
pub fn format_price(price: Price) -> String {
    format!("{:.2}", price)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_price() {
        assert_eq!(format_price(150.0), "150.00");
        assert_eq!(format_price(2799.456), "2799.46");
    }
}
