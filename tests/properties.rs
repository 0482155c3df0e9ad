use chrono::NaiveDate;
use proptest::prelude::*;
use therapy_schedule::models::{
    Placement, Session, SessionType, TherapistAvailability, TherapyRoom, TimeWindow,
};
use therapy_schedule::optimizer::{OptimizationRequest, OptimizerStrategy, ScheduleOptimizer};

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
}

fn availability() -> Vec<TherapistAvailability> {
    ["T1", "T2"]
        .into_iter()
        .map(|t| {
            TherapistAvailability::new(t, day(), TimeWindow::hm((9, 0), (17, 0)))
                .with_break(TimeWindow::hm((12, 0), (13, 0)))
        })
        .collect()
}

fn rooms() -> Vec<TherapyRoom> {
    ["R1", "R2"]
        .into_iter()
        .map(|r| TherapyRoom::new(r).supporting(SessionType::Speech))
        .collect()
}

fn strategy() -> impl Strategy<Value = OptimizerStrategy> {
    prop_oneof![
        Just(OptimizerStrategy::GeneticAlgorithm),
        Just(OptimizerStrategy::SimulatedAnnealing),
        Just(OptimizerStrategy::ConstraintSatisfaction),
        Just(OptimizerStrategy::Hybrid),
    ]
}

/// (therapist, room, student, start hour)
fn sessions() -> impl Strategy<Value = Vec<Session>> {
    prop::collection::vec((0usize..2, 0usize..2, 0usize..4, 9i32..16), 1..9).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (t, r, st, h))| {
                Session::new(
                    format!("S{i}"),
                    format!("ST{st}"),
                    SessionType::Speech,
                    Placement::new(
                        ["T1", "T2"][t],
                        ["R1", "R2"][r],
                        day(),
                        TimeWindow::hm((h, 0), (h + 1, 0)),
                    ),
                )
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_proposals_never_overlap_and_stay_inside_availability(
        sessions in sessions(),
        strategy in strategy(),
        seed in 0u64..1_000,
    ) {
        let availability = availability();
        let request = OptimizationRequest::new(sessions.clone(), availability.clone(), rooms())
            .with_strategy(strategy)
            .with_tolerance(1.0)
            .with_seed(seed);
        let result = ScheduleOptimizer::new().generate_optimal_schedule(&request).unwrap();

        prop_assert!(result.schedule.therapist_overlaps().is_empty());
        prop_assert!(result.schedule.room_overlaps().is_empty());
        prop_assert!(result.score >= 0.0 && result.score <= 1.0);
        prop_assert_eq!(result.schedule.len() + result.unresolved.len(), sessions.len());

        let assignments = &result.schedule.assignments;
        for (i, a) in assignments.iter().enumerate() {
            let window = a.placement.window();
            let record = availability
                .iter()
                .find(|r| r.therapist_id == a.placement.therapist_id && r.date == a.placement.date);
            prop_assert!(record.is_some_and(|r| r.can_host(&window)), "{:?}", a);

            for b in &assignments[i + 1..] {
                if a.student_id == b.student_id {
                    prop_assert!(!a.placement.overlaps(&b.placement), "{:?} / {:?}", a, b);
                }
            }
        }
    }
}
