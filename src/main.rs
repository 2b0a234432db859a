fn main() {
    if let Err(err) = tv_sleep_lib::run() {
        eprintln!("tv_sleep: {err}");
        std::process::exit(1);
    }
}
