fn main() {
    locker_kiosk_lib::run()
}
