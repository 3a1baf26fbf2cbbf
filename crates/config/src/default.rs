use crate::config::Log;

// default values
pub fn get_default_clients_port() -> u16 {
    8080
}

pub fn get_default_algorithm() -> String {
    String::from("roundrobin")
}

pub fn get_default_log_level() -> String {
    String::from("info")
}

pub fn get_default_log() -> Log {
    Log {
        level: get_default_log_level(),
        file: None,
    }
}
