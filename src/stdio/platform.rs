//! Platform adaptation for standard-stream identity

use crate::stdio::stream::StreamHandle;
use crate::stdio::table::Slot;

/// Whether `stream` is the process's real OS stream for `slot`
///
/// On unix this compares the backing descriptor against the reserved
/// 0/1/2. Elsewhere only streams that report the reserved number qualify,
/// which in practice means the `StdStream` handles.
pub fn is_real_standard_stream(stream: &StreamHandle, slot: Slot) -> bool {
    stream.descriptor_for(slot) == Some(slot.descriptor())
}
