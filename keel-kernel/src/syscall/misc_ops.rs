//! Console output and identifier capabilities

use keel_cap::{CapAddr, CapError, CapObject, CapRights, ObjectType};

use super::error::{Stage, StageExt, SyscallResult};
use crate::config::{PRINT_CHUNK, PRINT_MAX_LEN};
use crate::kernel::Kernel;
use crate::platform::Platform;

impl<P: Platform> Kernel<P> {
    /// Copy `len` bytes of user memory at `addr` to the console.
    ///
    /// # Errors
    ///
    /// [`CapError::InvalidArgument`] if `len` exceeds the print limit or
    /// the buffer is not readable.
    pub fn print(&mut self, addr: u64, len: usize) -> SyscallResult<()> {
        if len > PRINT_MAX_LEN {
            return Err(CapError::InvalidArgument.into());
        }
        let mut chunk = [0u8; PRINT_CHUNK];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(PRINT_CHUNK);
            let Some(at) = addr.checked_add(done as u64) else {
                return Err(CapError::InvalidArgument.into());
            };
            if !self.platform.read_user(at, &mut chunk[..n]) {
                return Err(CapError::InvalidArgument.into());
            }
            self.platform.console_write(&chunk[..n]);
            done += n;
        }
        Ok(())
    }

    /// Value of the identifier capability at `addr`: the creating core in
    /// the top 32 bits and the core-local id below.
    ///
    /// # Errors
    ///
    /// Lookup errors or [`CapError::TypeMismatch`], at the invoked
    /// capability stage.
    pub fn idcap_identify(&self, addr: CapAddr) -> SyscallResult<u64> {
        let found = self.lookup_typed(addr, ObjectType::Id, CapRights::READ, Stage::InvokedCapLookup)?;
        match found.cap.object {
            CapObject::Id(token) => Ok(token.identify()),
            _ => Err(CapError::TypeMismatch).stage(Stage::InvokedCapLookup),
        }
    }
}
