/// Membership test over a sorted boundary list.
///
/// `boundaries` holds `from, to + 1` for each range in ascending order, so
/// `c` is inside a range exactly when an odd number of boundaries are
/// `<= c`.
pub fn is_in_range_array(c: u32, boundaries: &[u32]) -> bool {
    boundaries.partition_point(|&b| b <= c) % 2 == 1
}
