use env_logger::Env;
use log::{Level, LevelFilter, Record};
use std::io::Write;

fn log_level_str(record: &Record) -> &'static str {
  match record.level() {
    Level::Error => "E",
    Level::Warn => "W",
    Level::Info => "I",
    Level::Debug => "D",
    Level::Trace => "T",
  }
}

pub fn setup_logger(filter_level: LevelFilter) {
  env_logger::Builder::from_env(Env::default().default_filter_or("warn"))
    .filter_level(filter_level)
    .format(|buf, record| {
      let level = log_level_str(record);
      let args = record.args();
      writeln!(buf, "[{level}] {args}")?;
      Ok(())
    })
    .init();
}

pub fn global_init() {
  color_eyre::config::HookBuilder::default()
    .install()
    .expect("color_eyre initialization failed");
}
