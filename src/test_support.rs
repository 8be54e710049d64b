use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

static SPAWN_LOCK: Mutex<()> = Mutex::new(());

/// Serialises tests that write scripts and spawn them, so no forked child
/// inherits a script that is still open for writing (ETXTBSY).
pub fn serial() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(unix)]
/// Writes an executable `/bin/sh` script standing in for ffmpeg.
///
/// It is invoked as `<script> -y -i <input> [args...] <output>`.
pub fn fake_encoder(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-ffmpeg");
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// `-version` only prints a banner. Otherwise behaves by input name: `*fail*` exits 1, `*slow*` waits for SIGINT and
/// exits 255, `*stubborn*` ignores SIGINT, anything else reports three
/// progress stamps, creates the output and exits 0. Each run appends the
/// input path to `invocations` next to the script.
pub const SCRIPTED_ENCODER: &str = r#"
case "$1" in
  -version)
    echo "ffmpeg version fake"
    exit 0 ;;
esac
in="$3"
for out; do :; done
echo "$in" >> "$(dirname "$0")/invocations"
case "$in" in
  *fail*)
    echo "$in: Invalid data found when processing input" >&2
    exit 1 ;;
  *slow*)
    trap 'exit 255' INT
    echo "time=00:00:01.00 slow start" >&2
    sleep 10 >/dev/null 2>&1 &
    wait $!
    exit 0 ;;
  *stubborn*)
    trap '' INT
    echo "time=00:00:01.00 stubborn start" >&2
    sleep 10 >/dev/null 2>&1 &
    wait $!
    exit 0 ;;
esac
echo "Input #0, from '$in':" >&2
printf 'frame=1 time=00:00:01.00 bitrate=1k\r' >&2
printf 'frame=2 time=00:00:02.00 bitrate=1k\r' >&2
echo "frame=4 time=00:00:04.00 bitrate=1k" >&2
: > "$out"
exit 0
"#;

pub fn invocations(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("invocations"))
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}
