#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut stream = lock!(self.stream);
///  stream.seek(SeekFrom::Start(0))?;
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}
