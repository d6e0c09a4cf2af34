pub mod sparse;

pub use sparse::TripletBuilder;
