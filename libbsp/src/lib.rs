#[macro_use]
pub mod io;
pub mod dedup;
pub mod model;
pub mod poly;
pub mod types;

extern crate bsp_derive;
extern crate bytes;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate typed_ints;
