fn main() {
    medscan_lib::run()
}
