//! Properties of effect plans across durations and configurations.

use proptest::prelude::*;
use stillreel_effects::{build_plan, EffectConfig, ZoomFunction};

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

proptest! {
    #[test]
    fn zoom_is_monotonic_and_bounded(
        rate in 0.0001f64..0.05,
        ceiling in 1.01f64..4.0,
        n in 0u64..100_000,
    ) {
        let zoom = ZoomFunction::new(rate, ceiling);
        let a = zoom.factor_at_frame(n);
        let b = zoom.factor_at_frame(n + 1);
        prop_assert!(a >= 1.0);
        prop_assert!(b >= a);
        prop_assert!(b <= ceiling + 1e-12);
    }

    #[test]
    fn zoom_reaches_ceiling_and_holds(rate in 0.0005f64..0.05, ceiling in 1.05f64..3.0) {
        let zoom = ZoomFunction::new(rate, ceiling);
        let at = zoom.frames_to_ceiling();
        prop_assert!((zoom.factor_at_frame(at) - ceiling).abs() < 1e-9);
        prop_assert!((zoom.factor_at_frame(at + 1_000) - ceiling).abs() < 1e-9);
    }

    #[test]
    fn truncation_matches_duration(duration in 0.05f64..3_600.0) {
        let plan = build_plan(duration, &EffectConfig::default()).unwrap();
        let args = plan.output_args();
        let t: f64 = arg_after(&args, "-t").unwrap().parse().unwrap();
        prop_assert!((t - duration).abs() <= 5e-7);
        prop_assert!(args.contains(&"-shortest".to_string()));
        prop_assert!(plan.total_frames as f64 >= duration * plan.fps as f64 - 1e-6);
    }

    #[test]
    fn frame_size_is_fixed_regardless_of_duration(duration in 0.05f64..600.0) {
        let config = EffectConfig::default();
        let plan = build_plan(duration, &config).unwrap();
        let filter = plan.video_filter();
        prop_assert!(filter.contains("s=1080x1920"));
        prop_assert!(filter.contains("crop=1080:1920"));
        let args = plan.output_args();
        prop_assert_eq!(arg_after(&args, "-pix_fmt"), Some("yuv420p"));
    }
}

#[test]
fn plan_args_golden() {
    let plan = build_plan(10.0, &EffectConfig::default()).unwrap();
    let args = plan.output_args().join(" ");
    assert_eq!(
        args,
        "-filter_complex [0:v]loop=loop=-1:size=1:start=0,\
         scale=1080:1920:force_original_aspect_ratio=increase,crop=1080:1920,\
         zoompan=z='min(1+0.0015*on,1.5)':x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':d=1:s=1080x1920:fps=25,\
         setsar=1,format=yuv420p[vout] \
         -map [vout] -map 1:a:0 -c:v libx264 -tune stillimage -preset medium -crf 23 \
         -pix_fmt yuv420p -r 25 -c:a aac -b:a 192k -t 10.000000 -shortest \
         -movflags frag_keyframe+empty_moov+default_base_moof -f mp4"
    );
    assert_eq!(plan.image_input_args(), vec!["-framerate", "25"]);
}

#[test]
fn config_round_trips_with_partial_json() {
    let config: EffectConfig = serde_json::from_str(r#"{"fps": 30, "zoom_ceiling": 1.3}"#).unwrap();
    assert_eq!(config.fps, 30);
    assert_eq!(config.width, 1080);
    assert!((config.zoom_ceiling - 1.3).abs() < 1e-12);
    config.validate().unwrap();
}
