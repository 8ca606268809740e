// Randomized invariant tests for the segment planner

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tplan_rs::motion::planner::{Segment, SegmentList, ValidationPolicy};
    use tplan_rs::motion::Joint;

    const EPS: f64 = 1e-6;

    fn random_joint(rng: &mut StdRng, index: usize) -> Joint {
        let v_max = rng.random_range(200.0..5000.0);
        let a_max = rng.random_range(100.0..20000.0);
        let d_max = if rng.random_bool(0.5) { a_max } else { rng.random_range(100.0..20000.0) };
        Joint::new(index, v_max, a_max, d_max).unwrap()
    }

    /// Every other seed gets one set of limits for all axes, the rest draw
    /// limits per axis.
    fn random_joints(rng: &mut StdRng, seed: u64) -> Vec<Joint> {
        let n = rng.random_range(1..=4);
        if seed % 2 == 0 {
            let joint = random_joint(rng, 0);
            (0..n).map(|index| Joint { index, ..joint }).collect()
        } else {
            (0..n).map(|i| random_joint(rng, i)).collect()
        }
    }

    fn random_move(rng: &mut StdRng, axes: usize) -> Vec<i64> {
        (0..axes)
            .map(|_| if rng.random_bool(0.2) { 0 } else { rng.random_range(-5000..=5000) })
            .collect()
    }

    fn run(seed: u64) -> (Vec<Joint>, SegmentList) {
        let mut rng = StdRng::seed_from_u64(seed);
        let joints = random_joints(&mut rng, seed);
        let mut list = SegmentList::new(&joints).unwrap();
        for _ in 0..25 {
            let m = random_move(&mut rng, joints.len());
            if let Err(e) = list.add_distance_segment(&m) {
                panic!("seed {}: move {:?} failed: {}", seed, m, e);
            }
        }
        list.finish();
        (joints, list)
    }

    #[test]
    fn test_every_segment_validates() {
        for seed in 0..40 {
            let (_, list) = run(seed);
            for seg in list.history() {
                let violations = seg.validate(ValidationPolicy::Collect).unwrap();
                assert!(violations.is_empty(), "seed {} segment {}: {:?}", seed, seg, violations);
            }
        }
    }

    #[test]
    fn test_distance_conservation() {
        for seed in 0..40 {
            let (_, list) = run(seed);
            for seg in list.history() {
                for js in seg.joint_segments() {
                    let total = js.x_a() + js.x_c() + js.x_d();
                    assert_eq!(total.round(), js.x(), "seed {} segment {}", seed, seg);
                }
            }
        }
    }

    #[test]
    fn test_velocity_bound() {
        for seed in 0..40 {
            let (joints, list) = run(seed);
            for seg in list.history() {
                for (js, joint) in seg.joint_segments().iter().zip(&joints) {
                    for v in [js.v_0(), js.v_c(), js.v_1()] {
                        assert!(v >= 0.0 && v <= joint.v_max + EPS, "seed {} segment {}", seed, seg);
                    }
                }
            }
        }
    }

    #[test]
    fn test_boundaries_are_continuous() {
        for seed in 0..40 {
            let (_, list) = run(seed);
            let history: Vec<&Segment> = list.history().iter().collect();

            for js in history[0].joint_segments() {
                assert_eq!(js.v_0(), 0.0);
            }
            for js in history[history.len() - 1].joint_segments() {
                assert_eq!(js.v_1(), 0.0);
            }

            for pair in history.windows(2) {
                let (prior, next) = (pair[0], pair[1]);
                for (p, n) in prior.joint_segments().iter().zip(next.joint_segments()) {
                    assert_eq!(p.v_1(), n.v_0(), "seed {} segments {} {}", seed, prior, next);
                    assert!(n.v_0() <= p.v_1_max() + EPS);
                    assert!(n.v_0() <= n.v_0_max() + EPS);
                    if next.sign_change() || p.x() == 0.0 || n.x() == 0.0 {
                        assert_eq!(n.v_0(), 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_shared_timing_and_master() {
        for seed in 0..40 {
            let (joints, list) = run(seed);
            let limits = |j: &Joint| (j.v_max, j.a_max, j.d_max);
            let same_limits = joints.iter().all(|j| limits(j) == limits(&joints[0]));
            for seg in list.history() {
                let master = &seg.joint_segments()[seg.master_axis()];
                let own = master.min_timing();
                assert_eq!((seg.t_a(), seg.t_d()), (own.t_a, own.t_d), "seed {} segment {}", seed, seg);
                assert!(seg.t_c() >= own.t_c);
                if same_limits {
                    assert!((seg.t_c() - own.t_c).abs() < 1e-9, "seed {} segment {}", seed, seg);
                }
                for js in seg.joint_segments() {
                    assert!(js.t_min() <= master.t_min());
                }
            }
        }
    }

    #[test]
    fn test_steps_add_up_to_positions() {
        for seed in 0..40 {
            let (joints, mut list) = run(seed);
            let mut steps = vec![0i64; joints.len()];
            let mut last_seg = 0;
            for ss in list.sub_segments() {
                assert!(ss.seg_number >= last_seg);
                last_seg = ss.seg_number;
                assert!(ss.t > 0.0);
                steps[ss.axis] += ss.x;
            }
            assert_eq!(steps, list.positions(), "seed {}", seed);
        }
    }
}
