pub mod prelude;

pub mod battles;
