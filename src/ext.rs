use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::checksum::SIDECAR_EXTENSION;

pub(crate) trait PathExt {
    fn sidecar(&self) -> PathBuf;
}

impl PathExt for Path {
    /// `foo.tar.xz` becomes `foo.tar.xz.sha256`.
    fn sidecar(&self) -> PathBuf {
        let mut name: OsString = self.as_os_str().to_owned();
        name.push(".");
        name.push(SIDECAR_EXTENSION);
        PathBuf::from(name)
    }
}

#[test]
fn sidecar_appends_extension() {
    assert_eq!(
        Path::new("/tmp/a/image.tar.xz").sidecar(),
        Path::new("/tmp/a/image.tar.xz.sha256")
    );
}
