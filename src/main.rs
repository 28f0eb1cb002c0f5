mod audio;
mod config;
mod library;
mod logging;
mod playlist;
mod runtime;
mod state;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    runtime::run()
}
