pub mod upgrade_guard;
