fn main() {
    quotasync_lib::run()
}
