fn main() {
    let args = std::env::args();

    if let Err(err) = dbrotate::run(args) {
        eprintln!("dbrotate error: {err:#}");
        std::process::exit(1);
    }
}
