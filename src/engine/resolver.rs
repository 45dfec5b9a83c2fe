use std::collections::HashSet;

use crate::model::*;

// ── Slot Resolution ───────────────────────────────────────────────

/// Minimum lead time before a still-future slot stops being bookable.
pub const DEFAULT_BUFFER_MS: Ms = 30 * 60_000;

/// Compute the single authoritative status for every slot start.
///
/// Precedence, highest wins:
/// 1. `past`: start <= now + buffer (boundary inclusive).
/// 2. `booked`: a pending/confirmed reservation sits exactly on the start.
///    Exact-minute match only; a reservation at an off-grid time marks
///    nothing.
/// 3. `unavailable` / `busy`: the start falls inside `[start, end)` of a
///    block with that status. Where contradictory blocks overlap,
///    `unavailable` beats `busy`: the source data permits overlap, so the
///    stricter verdict is the documented tie-break rather than whichever
///    block happens to sort first.
/// 4. `available`: the default inside working hours. An explicit
///    `available` block and no block at all are equivalent: stylists opt
///    into restricting, not into allowing.
///
/// Every caller (client booking view, stylist edit view, the booking
/// writer's own re-check) goes through this one function. Malformed or
/// contradictory input never raises; the precedence absorbs it.
pub fn resolve_slots(
    starts: &[Ms],
    blocks: &[AvailabilityBlock],
    reservations: &[Reservation],
    now: Ms,
    buffer: Ms,
) -> Vec<Slot> {
    let committed: HashSet<Ms> = reservations
        .iter()
        .filter(|r| r.status.is_active())
        .map(|r| r.scheduled_at)
        .collect();

    starts
        .iter()
        .map(|&t| Slot::new(t, slot_status(t, blocks, &committed, now, buffer)))
        .collect()
}

fn slot_status(
    t: Ms,
    blocks: &[AvailabilityBlock],
    committed: &HashSet<Ms>,
    now: Ms,
    buffer: Ms,
) -> SlotStatus {
    if t <= now + buffer {
        return SlotStatus::Past;
    }
    if committed.contains(&t) {
        return SlotStatus::Booked;
    }

    let mut busy = false;
    for block in blocks {
        if !block.span.contains_instant(t) {
            continue;
        }
        match block.status {
            BlockStatus::Unavailable => return SlotStatus::Unavailable,
            BlockStatus::Busy => busy = true,
            BlockStatus::Available => {}
        }
    }
    if busy { SlotStatus::Busy } else { SlotStatus::Available }
}

/// The grid with every verdict `unknown`, used when the stores could not be
/// read. Defaulting to `available` on fetch failure would let a client book
/// an unverified slot, so failure gets its own status instead.
pub fn unknown_slots(starts: &[Ms]) -> Vec<Slot> {
    starts
        .iter()
        .map(|&t| Slot::new(t, SlotStatus::Unknown))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    /// Grid anchored well inside the valid timestamp window:
    /// 2026-03-02T00:00:00Z.
    const DAY: Ms = 1_772_409_600_000;

    fn grid(open_h: i64, close_h: i64) -> Vec<Ms> {
        let mut starts = Vec::new();
        let mut t = DAY + open_h * H;
        while t < DAY + close_h * H {
            starts.push(t);
            t += 30 * M;
        }
        starts
    }

    fn block(start: Ms, end: Ms, status: BlockStatus) -> AvailabilityBlock {
        AvailabilityBlock {
            id: Ulid::new(),
            stylist_id: Ulid::new(),
            span: Span::new(start, end),
            status,
        }
    }

    fn reservation(at: Ms, status: ReservationStatus) -> Reservation {
        Reservation {
            id: Ulid::new(),
            stylist_id: Ulid::new(),
            client_id: Ulid::new(),
            service_id: None,
            scheduled_at: at,
            status,
            notes: None,
        }
    }

    fn status_at(slots: &[Slot], t: Ms) -> SlotStatus {
        slots.iter().find(|s| s.start == t).unwrap().status
    }

    #[test]
    fn open_day_all_available() {
        // 09:00–18:00, nothing on the calendar, clock well before opening.
        let starts = grid(9, 18);
        let slots = resolve_slots(&starts, &[], &[], DAY + 7 * H, 30 * M);
        assert_eq!(slots.len(), 18);
        assert!(slots.iter().all(|s| s.status == SlotStatus::Available));
    }

    #[test]
    fn buffer_marks_leading_slots_past() {
        // now 10:15, buffer 30 → 10:30 <= 10:45 is past, 11:00 is not.
        let starts = grid(9, 18);
        let now = DAY + 10 * H + 15 * M;
        let slots = resolve_slots(&starts, &[], &[], now, 30 * M);
        for t in [9 * H, 9 * H + 30 * M, 10 * H, 10 * H + 30 * M] {
            assert_eq!(status_at(&slots, DAY + t), SlotStatus::Past);
        }
        assert_eq!(status_at(&slots, DAY + 11 * H), SlotStatus::Available);
    }

    #[test]
    fn buffer_boundary_is_inclusive() {
        // now 10:00, buffer 30 → the 10:30 slot is exactly on the boundary
        // and counts as past.
        let starts = grid(9, 18);
        let now = DAY + 10 * H;
        let slots = resolve_slots(&starts, &[], &[], now, 30 * M);
        assert_eq!(status_at(&slots, DAY + 10 * H + 30 * M), SlotStatus::Past);
        assert_eq!(status_at(&slots, DAY + 11 * H), SlotStatus::Available);
    }

    #[test]
    fn past_beats_available_block() {
        let starts = grid(9, 18);
        let b = block(DAY + 9 * H, DAY + 18 * H, BlockStatus::Available);
        let now = DAY + 10 * H;
        let slots = resolve_slots(&starts, &[b], &[], now, 30 * M);
        assert_eq!(status_at(&slots, DAY + 9 * H), SlotStatus::Past);
    }

    #[test]
    fn busy_block_half_open_end() {
        // Block 14:00–15:00 busy: 14:00 and 14:30 busy, 15:00 available.
        let starts = grid(9, 18);
        let b = block(DAY + 14 * H, DAY + 15 * H, BlockStatus::Busy);
        let slots = resolve_slots(&starts, &[b], &[], DAY, 30 * M);
        assert_eq!(status_at(&slots, DAY + 14 * H), SlotStatus::Busy);
        assert_eq!(status_at(&slots, DAY + 14 * H + 30 * M), SlotStatus::Busy);
        assert_eq!(status_at(&slots, DAY + 15 * H), SlotStatus::Available);
    }

    #[test]
    fn unavailable_beats_busy_on_overlap() {
        let starts = grid(9, 18);
        let blocks = vec![
            block(DAY + 13 * H, DAY + 16 * H, BlockStatus::Busy),
            block(DAY + 14 * H, DAY + 15 * H, BlockStatus::Unavailable),
        ];
        let slots = resolve_slots(&starts, &blocks, &[], DAY, 30 * M);
        assert_eq!(status_at(&slots, DAY + 13 * H), SlotStatus::Busy);
        assert_eq!(status_at(&slots, DAY + 14 * H), SlotStatus::Unavailable);
        assert_eq!(status_at(&slots, DAY + 14 * H + 30 * M), SlotStatus::Unavailable);
        assert_eq!(status_at(&slots, DAY + 15 * H), SlotStatus::Busy);
    }

    #[test]
    fn block_order_does_not_change_verdict() {
        let starts = grid(9, 18);
        let a = block(DAY + 14 * H, DAY + 15 * H, BlockStatus::Unavailable);
        let b = block(DAY + 14 * H, DAY + 15 * H, BlockStatus::Busy);
        let forward = resolve_slots(&starts, &[a.clone(), b.clone()], &[], DAY, 30 * M);
        let reverse = resolve_slots(&starts, &[b, a], &[], DAY, 30 * M);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn booked_exact_match_only() {
        let starts = grid(9, 18);
        let on_grid = reservation(DAY + 11 * H, ReservationStatus::Pending);
        let off_grid = reservation(DAY + 11 * H + 10 * M, ReservationStatus::Confirmed);
        let slots = resolve_slots(&starts, &[], &[on_grid, off_grid], DAY, 30 * M);
        assert_eq!(status_at(&slots, DAY + 11 * H), SlotStatus::Booked);
        // the off-grid reservation marks no slot at all
        assert_eq!(status_at(&slots, DAY + 11 * H + 30 * M), SlotStatus::Available);
        assert_eq!(
            slots.iter().filter(|s| s.status == SlotStatus::Booked).count(),
            1
        );
    }

    #[test]
    fn booked_beats_unavailable_block() {
        let starts = grid(9, 18);
        let b = block(DAY + 11 * H, DAY + 12 * H, BlockStatus::Unavailable);
        let r = reservation(DAY + 11 * H, ReservationStatus::Confirmed);
        let slots = resolve_slots(&starts, &[b], &[r], DAY, 30 * M);
        assert_eq!(status_at(&slots, DAY + 11 * H), SlotStatus::Booked);
        assert_eq!(status_at(&slots, DAY + 11 * H + 30 * M), SlotStatus::Unavailable);
    }

    #[test]
    fn terminal_reservations_do_not_book() {
        let starts = grid(9, 18);
        let rs = vec![
            reservation(DAY + 11 * H, ReservationStatus::Cancelled),
            reservation(DAY + 12 * H, ReservationStatus::Declined),
            reservation(DAY + 13 * H, ReservationStatus::Completed),
        ];
        let slots = resolve_slots(&starts, &[], &rs, DAY, 30 * M);
        assert_eq!(status_at(&slots, DAY + 11 * H), SlotStatus::Available);
        assert_eq!(status_at(&slots, DAY + 12 * H), SlotStatus::Available);
        assert_eq!(status_at(&slots, DAY + 13 * H), SlotStatus::Available);
    }

    #[test]
    fn pending_and_confirmed_both_book() {
        let starts = grid(9, 18);
        let rs = vec![
            reservation(DAY + 11 * H, ReservationStatus::Pending),
            reservation(DAY + 12 * H, ReservationStatus::Confirmed),
        ];
        let slots = resolve_slots(&starts, &[], &rs, DAY, 30 * M);
        assert_eq!(status_at(&slots, DAY + 11 * H), SlotStatus::Booked);
        assert_eq!(status_at(&slots, DAY + 12 * H), SlotStatus::Booked);
    }

    #[test]
    fn available_block_equals_no_block() {
        let starts = grid(9, 18);
        let b = block(DAY + 10 * H, DAY + 12 * H, BlockStatus::Available);
        let with_block = resolve_slots(&starts, &[b], &[], DAY, 30 * M);
        let without = resolve_slots(&starts, &[], &[], DAY, 30 * M);
        assert_eq!(with_block, without);
    }

    #[test]
    fn off_grid_block_intersects_by_start_time() {
        // Block 14:15–14:45: only the 14:30 slot start falls inside it.
        let starts = grid(9, 18);
        let b = block(DAY + 14 * H + 15 * M, DAY + 14 * H + 45 * M, BlockStatus::Busy);
        let slots = resolve_slots(&starts, &[b], &[], DAY, 30 * M);
        assert_eq!(status_at(&slots, DAY + 14 * H), SlotStatus::Available);
        assert_eq!(status_at(&slots, DAY + 14 * H + 30 * M), SlotStatus::Busy);
        assert_eq!(status_at(&slots, DAY + 15 * H), SlotStatus::Available);
    }

    #[test]
    fn one_verdict_per_slot_under_contradiction() {
        // Heavy overlap of everything at once still yields exactly one
        // status per slot, and the same one every run.
        let starts = grid(9, 18);
        let blocks = vec![
            block(DAY + 9 * H, DAY + 18 * H, BlockStatus::Available),
            block(DAY + 10 * H, DAY + 14 * H, BlockStatus::Busy),
            block(DAY + 12 * H, DAY + 16 * H, BlockStatus::Unavailable),
            block(DAY + 12 * H, DAY + 13 * H, BlockStatus::Busy),
        ];
        let rs = vec![reservation(DAY + 12 * H, ReservationStatus::Pending)];
        let now = DAY + 9 * H;
        let first = resolve_slots(&starts, &blocks, &rs, now, 30 * M);
        let second = resolve_slots(&starts, &blocks, &rs, now, 30 * M);
        assert_eq!(first, second);
        assert_eq!(first.len(), starts.len());
        assert_eq!(status_at(&first, DAY + 12 * H), SlotStatus::Booked);
        assert_eq!(status_at(&first, DAY + 12 * H + 30 * M), SlotStatus::Unavailable);
        assert_eq!(status_at(&first, DAY + 11 * H), SlotStatus::Busy);
    }

    #[test]
    fn empty_grid_resolves_empty() {
        let slots = resolve_slots(&[], &[], &[], DAY, 30 * M);
        assert!(slots.is_empty());
    }

    #[test]
    fn unknown_slots_cover_grid() {
        let starts = grid(9, 11);
        let slots = unknown_slots(&starts);
        assert_eq!(slots.len(), 4);
        assert!(slots.iter().all(|s| s.status == SlotStatus::Unknown));
    }

    #[test]
    fn zero_buffer_still_excludes_now() {
        let starts = grid(9, 18);
        let now = DAY + 11 * H;
        let slots = resolve_slots(&starts, &[], &[], now, 0);
        // start == now is past even with no buffer (inclusive comparison)
        assert_eq!(status_at(&slots, DAY + 11 * H), SlotStatus::Past);
        assert_eq!(status_at(&slots, DAY + 11 * H + 30 * M), SlotStatus::Available);
    }
}
