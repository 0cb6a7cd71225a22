use flexi_logger::{DeferredNow, style};
use log::Record;

/// `12:00:01.250 INFO  [medid_core::emergency::controller] message`
pub fn cli_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    let level = record.level();
    write!(
        w,
        "{} {} [{}] {}",
        now.format("%H:%M:%S%.3f"),
        style(level).paint(format!("{level:<5}")),
        record.module_path().unwrap_or("<unnamed>"),
        record.args()
    )
}
