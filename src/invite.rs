//! Invite-code generation.

use rand::RngCore;

/// Number of random bytes behind each code (rendered as twice as many hex digits).
const INVITE_CODE_BYTES: usize = 5;

/// Produces short, human-typeable invite codes. Uniqueness is enforced by the
/// store; generators only need high entropy.
pub trait InviteCodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Ten uppercase hex characters from the thread RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomInviteCodes;

impl InviteCodeGenerator for RandomInviteCodes {
    fn generate(&self) -> String {
        let mut bytes = [0u8; INVITE_CODE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode_upper(bytes)
    }
}

/// Replays a fixed list of codes, then falls back to random ones.
#[derive(Debug, Default)]
pub struct ScriptedInviteCodes {
    codes: std::sync::Mutex<std::collections::VecDeque<String>>,
}

impl ScriptedInviteCodes {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: std::sync::Mutex::new(codes.into_iter().map(Into::into).collect()),
        }
    }
}

impl InviteCodeGenerator for ScriptedInviteCodes {
    fn generate(&self) -> String {
        let next = self.codes.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or_else(|| RandomInviteCodes.generate())
    }
}
