//! The protocol session kinds and their service-name decoding.
//!
//! The smart HTTP surface names its services `git-upload-pack` (fetch) and
//! `git-receive-pack` (push); reference advertisement is a mode over either
//! kind. Anything else is rejected at the boundary.

use std::fmt;

use anchorgit_engine::ServiceKind;

use crate::{GitError, GitResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionKind {
    UploadPack,
    ReceivePack,
}

impl SessionKind {
    /// The wire service name, as used in URLs and content types.
    pub const fn service_name(self) -> &'static str {
        match self {
            Self::UploadPack => "git-upload-pack",
            Self::ReceivePack => "git-receive-pack",
        }
    }

    /// Decode a `service` query parameter value.
    pub fn from_service_str(s: &str) -> GitResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "git-upload-pack" => Ok(Self::UploadPack),
            "git-receive-pack" => Ok(Self::ReceivePack),
            other => Err(GitError::UnsupportedSessionKind(other.to_string())),
        }
    }

    pub(crate) fn engine_kind(self) -> ServiceKind {
        match self {
            Self::UploadPack => ServiceKind::UploadPack,
            Self::ReceivePack => ServiceKind::ReceivePack,
        }
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.service_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_the_two_smart_services() {
        let cases = [
            ("git-receive-pack", SessionKind::ReceivePack, false),
            ("git-upload-pack", SessionKind::UploadPack, false),
            ("GIT-UPLOAD-PACK", SessionKind::UploadPack, false),
            ("invalid-type", SessionKind::UploadPack, true),
            ("", SessionKind::UploadPack, true),
        ];

        for (input, expected, expect_err) in cases {
            let got = SessionKind::from_service_str(input);
            if expect_err {
                assert!(matches!(got, Err(GitError::UnsupportedSessionKind(_))));
            } else {
                assert_eq!(got.unwrap(), expected);
            }
        }
    }

    #[test]
    fn displays_as_the_service_name() {
        assert_eq!(SessionKind::ReceivePack.to_string(), "git-receive-pack");
        assert_eq!(SessionKind::UploadPack.to_string(), "git-upload-pack");
    }
}
