pub mod io;

pub use io::{read_from_stdin, read_token_from_stdin};
