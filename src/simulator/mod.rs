//! Trading side of the simulator: prices, order routing and matching.

pub mod error;
pub mod matching;
pub mod price_book;
pub mod router;
pub mod types;

pub use error::{SimulatorError, SimulatorResult};
pub use matching::MatchingEngine;
pub use price_book::PriceBook;
pub use router::{parse_quantity, ClientApplication, OrderRouter};
pub use types::{ExecutionResult, Instrument, Order, OrderType, Price, Quantity, Side};
