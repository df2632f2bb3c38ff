use core::str;

/// a broadcast could not be scheduled because it
/// is not in the draft or scheduled status
pub static BROADCAST_NOT_SCHEDULABLE: &str = "BROADCAST_NOT_SCHEDULABLE";

/// a broadcast could not be cancelled because sending already started
pub static BROADCAST_NOT_CANCELLABLE: &str = "BROADCAST_NOT_CANCELLABLE";

/// a winner could not be selected because the broadcast
/// is not on the testing or test_completed status
pub static BROADCAST_NOT_IN_TEST: &str = "BROADCAST_NOT_IN_TEST";

/// the selected winning template is not one of the test variations
pub static TEMPLATE_NOT_A_VARIATION: &str = "TEMPLATE_NOT_A_VARIATION";

/// a segment operation was rejected because the segment is soft deleted
pub static SEGMENT_DELETED: &str = "SEGMENT_DELETED";

/// a segment tree failed to compile to a audience query
pub static INVALID_SEGMENT_TREE: &str = "INVALID_SEGMENT_TREE";

/// a broadcast audience names neither a list nor a segment
pub static EMPTY_AUDIENCE: &str = "EMPTY_AUDIENCE";
