pub use self::{list::*, tool::*};

mod list;
mod tool;
