const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;

/// Human-readable size: bytes below 1 KB, otherwise KB or MB with two decimals.
pub fn format_file_size(bytes: u64) -> String {
    if bytes < KIB {
        return format!("{bytes} B");
    }
    if bytes < MIB {
        return format!("{:.2} KB", bytes as f64 / KIB as f64);
    }
    format!("{:.2} MB", bytes as f64 / MIB as f64)
}
