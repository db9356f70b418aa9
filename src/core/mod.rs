pub mod adaptive;
pub mod breakout;
pub mod currency;
pub mod divergence;
pub mod extremum;
pub mod filters;
pub mod position_sizer;
pub mod range;
pub mod sessions;
pub mod stop_loss;
pub mod volume;
