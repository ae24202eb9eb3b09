fn main() {
    let args: Vec<String> = std::env::args().collect();
    if let Err(err) = waygate::run(&args) {
        eprintln!("waygate: {}", err);
        std::process::exit(1);
    }
}
