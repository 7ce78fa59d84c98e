mod loader;
mod types;

pub use loader::{CONFIG_ENV, CONFIG_FILE, load, load_file, resolve};
pub use types::{Concurrency, Config};
