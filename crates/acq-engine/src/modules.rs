//! Standard axis generators for multi-dimensional acquisitions.
//!
//! Each function returns an [`AxisGenerator`] that can be placed anywhere in
//! the generator list; the order of the list is the nesting order of the
//! acquisition (outermost first).

use std::sync::Arc;

use acq_core::{AcqResult, AcquisitionEvent, AxisName, ChannelGroup, XyPosition};

use crate::event_tree::{axis_generator, AxisGenerator};

/// Time points `0..frames` (unbounded when `frames` is `None`), paced
/// `interval_ms` apart on the acquisition clock.
pub fn timelapse(frames: Option<usize>, interval_ms: f64) -> AxisGenerator {
    let time = AxisName::time();
    axis_generator(move |event: &AcquisitionEvent| {
        let base = event.clone();
        let time = time.clone();
        let points = (0_i64..).take(frames.unwrap_or(usize::MAX));
        Ok(points.map(move |t| {
            let child = base.clone().with_axis(&time, t);
            if interval_ms > 0.0 {
                child.with_minimum_start_time_ms((t as f64 * interval_ms).round() as u64)
            } else {
                child
            }
        }))
    })
}

/// Slices `start_index..=stop_index`, slice `i` at `origin_um + i * step_um`.
pub fn z_stack(start_index: i64, stop_index: i64, step_um: f64, origin_um: f64) -> AxisGenerator {
    let z = AxisName::z();
    axis_generator(move |event: &AcquisitionEvent| {
        let base = event.clone();
        let z = z.clone();
        Ok((start_index..=stop_index).map(move |i| {
            base.clone()
                .with_axis(&z, i)
                .with_z(origin_um + i as f64 * step_um)
        }))
    })
}

/// Every enabled channel of `group`, in list order.
///
/// Sets the channel preset and exposure; when the parent event already has a
/// z position the channel's offset is added to it.
pub fn channels(group: &ChannelGroup) -> AxisGenerator {
    let group = Arc::new(group.clone());
    axis_generator(move |event: &AcquisitionEvent| {
        let base = event.clone();
        let group = Arc::clone(&group);
        let mut current: Option<String> = None;
        Ok(std::iter::from_fn(move || {
            let name = group.next_active_channel(current.as_deref())?.to_string();
            let spec = group.get(&name)?;
            let mut child = base
                .clone()
                .with_channel(spec.group.as_deref(), name.clone())
                .with_exposure(spec.exposure_ms);
            if let Some(z) = child.z_position_um() {
                child = child.with_z(z + spec.offset_um);
            }
            current = Some(name);
            Some(child)
        }))
    })
}

/// One child per stage position.
pub fn positions(list: &[XyPosition]) -> AxisGenerator {
    let list: Arc<[XyPosition]> = list.into();
    axis_generator(move |event: &AcquisitionEvent| {
        let base = event.clone();
        let list = Arc::clone(&list);
        Ok((0..list.len()).map(move |i| base.clone().with_xy(list[i].clone())))
    })
}

/// Indices `0..count` along an arbitrary user axis.
pub fn axis_range(name: &str, count: i64) -> AcqResult<AxisGenerator> {
    let axis = AxisName::new(name)?;
    Ok(axis_generator(move |event: &AcquisitionEvent| {
        let base = event.clone();
        let axis = axis.clone();
        Ok((0..count).map(move |i| base.clone().with_axis(&axis, i)))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_tree::EventTreeIterator;
    use acq_core::{AcqError, ChannelSpec};

    fn expand(generators: Vec<AxisGenerator>) -> Vec<AcquisitionEvent> {
        EventTreeIterator::new(AcquisitionEvent::new(), generators)
            .collect::<AcqResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn timelapse_paces_time_points() {
        let events = expand(vec![timelapse(Some(3), 500.0)]);
        let starts: Vec<_> = events
            .iter()
            .map(|e| e.minimum_start_time_ms())
            .collect();
        assert_eq!(starts, vec![Some(0), Some(500), Some(1000)]);
        assert_eq!(events[2].axis_position("time"), Some(2));
    }

    #[test]
    fn unbounded_timelapse_is_lazy() {
        let mut iter = EventTreeIterator::new(AcquisitionEvent::new(), vec![timelapse(None, 0.0)]);
        let tenth = iter.nth(9).unwrap().unwrap();
        assert_eq!(tenth.axis_position("time"), Some(9));
        assert_eq!(tenth.minimum_start_time_ms(), None);
    }

    #[test]
    fn z_stack_positions_slices() {
        let events = expand(vec![z_stack(0, 2, 1.5, 10.0)]);
        let zs: Vec<_> = events.iter().filter_map(|e| e.z_position_um()).collect();
        assert_eq!(zs, vec![10.0, 11.5, 13.0]);
    }

    #[test]
    fn channels_skip_disabled_and_apply_offsets() {
        let group = ChannelGroup::from_channels(
            "Channel",
            vec![
                ChannelSpec::new("DAPI", 10.0).with_offset(0.5),
                ChannelSpec::new("Cy5", 50.0).disabled(),
                ChannelSpec::new("GFP", 20.0),
            ],
        );
        let events = expand(vec![z_stack(0, 0, 1.0, 3.0), channels(&group)]);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].channel_name(), Some("DAPI"));
        assert_eq!(events[0].z_position_um(), Some(3.5));
        assert_eq!(events[0].exposure_ms(), Some(10.0));
        assert_eq!(events[1].channel_name(), Some("GFP"));
        assert_eq!(events[1].z_position_um(), Some(3.0));
        assert_eq!(
            events[1].channel().and_then(|c| c.group.as_deref()),
            Some("Channel")
        );
    }

    #[test]
    fn positions_and_custom_axes_nest() {
        let stage = vec![
            XyPosition::new(0.0, 0.0).named("A1"),
            XyPosition::new(100.0, 0.0).named("A2"),
        ];
        let events = expand(vec![positions(&stage), axis_range("angle", 2).unwrap()]);
        assert_eq!(events.len(), 4);
        assert_eq!(events[3].xy_position().and_then(|p| p.name.as_deref()), Some("A2"));
        assert_eq!(events[3].axis_position("angle"), Some(1));
    }

    #[test]
    fn axis_range_rejects_reserved_names() {
        assert!(matches!(
            axis_range("channel", 3),
            Err(AcqError::ReservedAxis(_))
        ));
    }
}
