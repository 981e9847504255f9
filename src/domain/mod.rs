pub mod ewh;
pub mod series;
pub mod tariff;

pub use ewh::*;
pub use series::*;
pub use tariff::*;
