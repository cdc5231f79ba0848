pub mod parser;
pub mod schema;

pub use parser::{parse_directory_file, parse_directory_str};
pub use schema::{YamlDirectory, YamlEntry, YamlSchema};
