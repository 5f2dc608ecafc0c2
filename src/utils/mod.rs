//! Various utilities functions and types

mod clock;
mod geometry;

pub use self::clock::{Clock, ClockSource, Monotonic, NonNegativeClockSource, Time};
pub use self::geometry::{Coordinate, Local, Point, Rectangle, Root, Size};
