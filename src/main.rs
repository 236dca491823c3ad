fn main() {
    env_logger::init();
    mcc::compiler_main();
}
