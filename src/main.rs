fn main() {
    if let Err(err) = csv_bulk_import::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
