//! Mapping from upstream payloads to the domain model

use std::sync::Arc;

use crate::types::{
    LapDataByParticipant, Participant, RaceResult, RawParticipant, RawResult, RawSession,
    seconds_from_units,
};

/// Converts a raw result and its resolved race block into a [`RaceResult`].
///
/// Returns `None` when the payload cannot produce a result; the pipeline
/// treats that as an invalid result shape.
pub trait Transformer: Send + Sync + 'static {
    fn transform(
        &self,
        raw: &RawResult,
        race: &RawSession,
        laps: &LapDataByParticipant,
    ) -> Option<RaceResult>;
}

/// Field mapping viewed from one driver's perspective.
///
/// The focus driver supplies the per-driver summary fields (positions,
/// incidents, rating changes). Without a focus driver, or when that driver
/// is not in the field, the race winner is used.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransformer {
    focus_cust_id: Option<i64>,
}

impl DefaultTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_driver(cust_id: i64) -> Self {
        Self { focus_cust_id: Some(cust_id) }
    }

    fn focus<'a>(&self, entrants: &'a [RawParticipant]) -> Option<&'a RawParticipant> {
        self.focus_cust_id
            .and_then(|cust_id| entrants.iter().find(|p| p.cust_id == cust_id))
            .or_else(|| entrants.iter().min_by_key(|p| p.finish_position))
    }
}

impl Transformer for DefaultTransformer {
    fn transform(
        &self,
        raw: &RawResult,
        race: &RawSession,
        laps: &LapDataByParticipant,
    ) -> Option<RaceResult> {
        let entrants = race.results.as_deref().filter(|entrants| !entrants.is_empty())?;
        let focus = self.focus(entrants)?;

        let participants: Vec<Participant> = entrants
            .iter()
            .map(|entrant| Participant {
                name: entrant.display_name.clone(),
                cust_id: entrant.cust_id,
                start_position: entrant.starting_position.saturating_add(1),
                finish_position: entrant.finish_position.saturating_add(1),
                incidents: entrant.incidents,
                fastest_lap: seconds_from_units(entrant.best_lap_time),
                irating: entrant.newi_rating,
                laps: laps.get(&entrant.cust_id).map(|l| l.to_vec()).unwrap_or_default(),
            })
            .collect();

        let track_name = match raw.track.config_name.as_deref() {
            Some(config) if !config.is_empty() => format!("{} - {}", raw.track.track_name, config),
            _ => raw.track.track_name.clone(),
        };

        Some(RaceResult {
            id: raw.subsession_id,
            track_name,
            series_name: raw.series_name.clone(),
            date: raw.start_time.clone(),
            car: focus.car_name.clone(),
            category: raw
                .license_category
                .clone()
                .or_else(|| focus.car_class_name.clone())
                .unwrap_or_default(),
            start_position: focus.starting_position.saturating_add(1),
            finish_position: focus.finish_position.saturating_add(1),
            incidents: focus.incidents,
            strength_of_field: raw.event_strength_of_field,
            laps_led: focus.laps_lead,
            irating_change: focus.newi_rating.saturating_sub(focus.oldi_rating),
            safety_rating_change: focus.new_sub_level.saturating_sub(focus.old_sub_level) as f32 / 100.0,
            fastest_lap: seconds_from_units(focus.best_lap_time),
            participants,
        })
    }
}

impl<T: Transformer + ?Sized> Transformer for Arc<T> {
    fn transform(
        &self,
        raw: &RawResult,
        race: &RawSession,
        laps: &LapDataByParticipant,
    ) -> Option<RaceResult> {
        (**self).transform(raw, race, laps)
    }
}
