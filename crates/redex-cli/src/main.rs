fn main() {
    env_logger::init();
    let args: Vec<String> = std::env::args().collect();
    let code = redex_cli::run(&args);
    std::process::exit(code);
}
