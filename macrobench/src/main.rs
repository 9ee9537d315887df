use macrobench_core::TrackingAllocator;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator;

fn main() {
    if let Err(e) = macrobench_cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
