fn main() {
    if gemara_calm::run().is_err() {
        std::process::exit(1);
    }
}
