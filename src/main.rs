fn main() {
    if let Err(e) = contactlink_lib::run() {
        eprintln!("contactlink: {:#}", e);
        std::process::exit(1);
    }
}
