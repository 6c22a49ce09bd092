fn main() {
    liblemuri::entrypoints::run_session_manager();
}
