//! Argument vector construction
//!
//! Renders a compiled `FilterGraph` into the exact argv passed to ffmpeg.
//! The rendering is deterministic: the same graph and paths always produce
//! the same vector, in the same order, with no shell involved.

use std::path::Path;

use crate::compile::{FilterGraph, InputDirective};

/// Build the full ffmpeg argument vector for one invocation.
///
/// Flag order is fixed: global flags, input directive, input, filters,
/// stream drops, video output settings, audio output settings, duration
/// cap, output path.
pub fn build_ffmpeg_args(graph: &FilterGraph, input: &Path, output: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostats".into(),
        "-loglevel".into(),
        "error".into(),
        "-progress".into(),
        "pipe:1".into(),
    ];

    match graph.input_directive {
        InputDirective::Plain => {}
        InputDirective::LoopImage => {
            args.push("-loop".into());
            args.push("1".into());
        }
        InputDirective::LoopVideo => {
            args.push("-stream_loop".into());
            args.push("-1".into());
        }
    }

    args.push("-i".into());
    args.push(input.display().to_string());

    if let Some(complex) = &graph.complex {
        args.push("-filter_complex".into());
        args.push(complex.script.clone());
        args.push("-map".into());
        args.push(complex.video_label.clone());
    } else {
        if !graph.video_filters.is_empty() {
            args.push("-vf".into());
            args.push(graph.video_filters.join(","));
        }
        if !graph.audio_filters.is_empty() {
            args.push("-af".into());
            args.push(graph.audio_filters.join(","));
        }
    }

    let out = &graph.output;
    if out.drop_video {
        args.push("-vn".into());
    }
    if out.drop_audio {
        args.push("-an".into());
    }

    if let Some(codec) = out.video_codec {
        args.push("-c:v".into());
        args.push(codec.into());
    }
    if let Some(pix_fmt) = out.pix_fmt {
        args.push("-pix_fmt".into());
        args.push(pix_fmt.into());
    }
    if let Some(rate) = out.frame_rate {
        args.push("-r".into());
        args.push(rate.to_string());
    }

    if let Some(codec) = out.audio_codec {
        args.push("-c:a".into());
        args.push(codec.into());
    }
    if let Some(bitrate) = &out.audio_bitrate {
        args.push("-b:a".into());
        args.push(bitrate.clone());
    }
    if let Some(sample_rate) = out.sample_rate {
        args.push("-ar".into());
        args.push(sample_rate.to_string());
    }
    if let Some(channels) = out.channels {
        args.push("-ac".into());
        args.push(channels.to_string());
    }

    if let Some(duration) = out.duration_secs {
        args.push("-t".into());
        args.push(format!("{duration}"));
    }

    args.push(output.display().to_string());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{ComplexGraph, OutputSettings};
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn audio_graph(filters: Vec<String>, bitrate: &str) -> FilterGraph {
        FilterGraph {
            input_directive: InputDirective::Plain,
            video_filters: Vec::new(),
            audio_filters: filters,
            complex: None,
            output: OutputSettings {
                audio_bitrate: Some(bitrate.to_string()),
                sample_rate: Some(44100),
                channels: Some(2),
                drop_video: true,
                ..Default::default()
            },
            expected_duration_secs: Some(60.0),
        }
    }

    /// Positions of `-i` and the trailing output path sanity-check the
    /// overall argv shape
    fn shape_ok(args: &[String], input: &str, output: &str) -> bool {
        let i_pos = args.iter().position(|a| a == "-i");
        matches!(i_pos, Some(p) if args.get(p + 1).map(String::as_str) == Some(input))
            && args.last().map(String::as_str) == Some(output)
    }

    #[test]
    fn test_audio_argv_shape() {
        let graph = audio_graph(vec!["atempo=1.5".into()], "192k");
        let args = build_ffmpeg_args(
            &graph,
            Path::new("/in/song.mp3"),
            Path::new("/out/song_fast.mp3"),
        );
        assert!(shape_ok(&args, "/in/song.mp3", "/out/song_fast.mp3"));
        assert!(args.contains(&"-vn".to_string()));
        assert!(!args.contains(&"-an".to_string()));

        let af_pos = args.iter().position(|a| a == "-af").unwrap();
        assert_eq!(args[af_pos + 1], "atempo=1.5");
    }

    #[test]
    fn test_filter_chain_joined_with_commas() {
        let graph = audio_graph(
            vec![
                "asetrate=44100*1.5".into(),
                "aresample=44100".into(),
                "atempo=0.9".into(),
            ],
            "256k",
        );
        let args = build_ffmpeg_args(&graph, Path::new("a.mp3"), Path::new("b.mp3"));
        let af_pos = args.iter().position(|a| a == "-af").unwrap();
        assert_eq!(args[af_pos + 1], "asetrate=44100*1.5,aresample=44100,atempo=0.9");
    }

    #[test]
    fn test_loop_directives() {
        let mut graph = audio_graph(Vec::new(), "192k");
        graph.input_directive = InputDirective::LoopImage;
        let args = build_ffmpeg_args(&graph, Path::new("a.png"), Path::new("b.mp4"));
        let pos = args.iter().position(|a| a == "-loop").unwrap();
        assert_eq!(args[pos + 1], "1");

        graph.input_directive = InputDirective::LoopVideo;
        let args = build_ffmpeg_args(&graph, Path::new("a.mp4"), Path::new("b.mp4"));
        let pos = args.iter().position(|a| a == "-stream_loop").unwrap();
        assert_eq!(args[pos + 1], "-1");
    }

    #[test]
    fn test_complex_graph_maps_label() {
        let graph = FilterGraph {
            input_directive: InputDirective::Plain,
            video_filters: vec!["should_be_ignored".into()],
            audio_filters: Vec::new(),
            complex: Some(ComplexGraph {
                script: "[0:v]reverse[vout]".into(),
                video_label: "[vout]".into(),
            }),
            output: OutputSettings {
                video_codec: Some("libx264"),
                pix_fmt: Some("yuv420p"),
                drop_audio: true,
                ..Default::default()
            },
            expected_duration_secs: None,
        };
        let args = build_ffmpeg_args(&graph, Path::new("a.mp4"), Path::new("b.mp4"));
        let pos = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert_eq!(args[pos + 1], "[0:v]reverse[vout]");
        let map = args.iter().position(|a| a == "-map").unwrap();
        assert_eq!(args[map + 1], "[vout]");
        assert!(!args.contains(&"-vf".to_string()));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Every output setting that is set must surface in the argv, and
        // the vector always starts with the fixed global flags
        #[test]
        fn prop_argv_completeness(
            bitrate in prop::sample::select(vec!["128k", "192k", "256k", "320k"]),
            duration in 1.0f64..600.0,
            stage_count in 1usize..5,
        ) {
            let filters: Vec<String> = (0..stage_count)
                .map(|i| format!("atempo=1.{i}"))
                .collect();
            let mut graph = audio_graph(filters.clone(), bitrate);
            graph.output.duration_secs = Some(duration);

            let args = build_ffmpeg_args(
                &graph,
                Path::new("/in/x.mp3"),
                Path::new("/out/y.mp3"),
            );

            prop_assert_eq!(&args[0], "-y");
            prop_assert!(args.contains(&"-progress".to_string()));
            prop_assert!(args.contains(&"pipe:1".to_string()));
            prop_assert!(shape_ok(&args, "/in/x.mp3", "/out/y.mp3"));
            prop_assert!(args.contains(&bitrate.to_string()));
            let has_duration = args.contains(&format!("{duration}"));
            prop_assert!(has_duration);
            let af_pos = args.iter().position(|a| a == "-af").unwrap();
            for stage in &filters {
                prop_assert!(args[af_pos + 1].contains(stage.as_str()));
            }
        }

        // Identical inputs always render identical argv
        #[test]
        fn prop_argv_deterministic(duration in 1.0f64..100.0) {
            let mut graph = audio_graph(vec!["atempo=2".into()], "128k");
            graph.output.duration_secs = Some(duration);
            let a = build_ffmpeg_args(&graph, Path::new("i.mp3"), Path::new("o.mp3"));
            let b = build_ffmpeg_args(&graph, Path::new("i.mp3"), Path::new("o.mp3"));
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn test_output_never_prompts() {
        let graph = audio_graph(Vec::new(), "192k");
        let args = build_ffmpeg_args(&graph, PathBuf::from("a").as_path(), Path::new("b"));
        assert_eq!(args[0], "-y");
    }
}
