pub mod analyze;
pub mod batch;
pub mod history;
pub mod probe;
pub mod results;

pub use analyze::*;
pub use batch::*;
pub use history::*;
pub use probe::*;
pub use results::*;
