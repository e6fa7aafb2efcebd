mod common;

#[cfg(test)]
mod tests {
    use super::common::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;
    use std::io::Cursor;
    use tsdemux::av::{AccessUnit, StreamKind, StreamType};
    use tsdemux::config::{DemuxConfig, PidRequest};
    use tsdemux::error::{DemuxError, Result, SeekError};
    use tsdemux::format::ts::{ElementaryStreamInfo, PESPacket, PacketSize, PMT, TS_PACKET_SIZE};
    use tsdemux::format::{IoSource, PacketSource, SeekTarget, TSDemuxer};

    type MemoryDemuxer = TSDemuxer<IoSource<Cursor<Vec<u8>>>>;

    fn av_pmt() -> PMT {
        PMT::new(1, VIDEO_PID)
            .with_stream(ElementaryStreamInfo::new(0x02, VIDEO_PID))
            .with_stream(ElementaryStreamInfo::new(0x03, AUDIO_PID))
    }

    fn audio_pmt() -> PMT {
        PMT::new(1, AUDIO_PID).with_stream(ElementaryStreamInfo::new(0x03, AUDIO_PID))
    }

    fn open(builder: &StreamBuilder, config: DemuxConfig) -> Result<MemoryDemuxer> {
        TSDemuxer::open(builder.source(), config)
    }

    fn audio_only() -> DemuxConfig {
        DemuxConfig {
            video: PidRequest::Disabled,
            ..DemuxConfig::default()
        }
    }

    fn drain(demuxer: &mut MemoryDemuxer, kind: StreamKind) -> Vec<AccessUnit> {
        let mut units = Vec::new();
        while let Some(unit) = demuxer.next_unit(kind).unwrap() {
            units.push(unit);
        }
        units
    }

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_end_to_end_single_unit() -> Result<()> {
        let payload = pattern(3000, 1);
        let mut builder = StreamBuilder::new();
        builder
            .pat(&single_program_pat())
            .pmt(PMT_PID, &av_pmt())
            .pes(VIDEO_PID, &PESPacket::new(0xe0, payload.clone()).with_pts(1.0), 20)
            .null_packets(12);

        let mut demuxer = open(&builder, DemuxConfig::default())?;
        assert_eq!(demuxer.packet_size(), PacketSize::Standard);
        assert_eq!(demuxer.selected_pids(), (Some(VIDEO_PID), None));
        assert_eq!(demuxer.program_id(), Some(1));

        let unit = demuxer.next_unit(StreamKind::Video)?.expect("one unit");
        assert_eq!(&unit.data[..], &payload[..]);
        assert_eq!(unit.pts, 1.0);
        assert_eq!(unit.position, 2 * TS_PACKET_SIZE as u64);
        assert_eq!(unit.pid, VIDEO_PID);
        assert_eq!(unit.stream_type, StreamType::VideoMpeg2);
        assert!(!unit.broken);

        assert!(demuxer.next_unit(StreamKind::Video)?.is_none());
        assert!(demuxer.next_unit(StreamKind::Audio)?.is_none());
        assert_eq!(demuxer.diagnostics().continuity_errors, 0);

        let source = demuxer.close();
        assert!(source.eof());
        Ok(())
    }

    #[test]
    fn test_units_split_over_1_2_and_50_packets() -> Result<()> {
        for unbounded in [false, true] {
            for packets in [1usize, 2, 50] {
                let first = pattern(150 * packets, 3);
                let second = pattern(150 * packets, 9);
                let pes = |data: &Vec<u8>, pts: f64| {
                    let pes = PESPacket::new(0xc0, data.clone()).with_pts(pts);
                    if unbounded {
                        pes.unbounded()
                    } else {
                        pes
                    }
                };

                let mut builder = StreamBuilder::new();
                builder
                    .pat(&single_program_pat())
                    .pmt(PMT_PID, &audio_pmt())
                    .pes(AUDIO_PID, &pes(&first, 0.5), packets)
                    .pes(AUDIO_PID, &pes(&second, 0.6), packets)
                    .null_packets(40);

                let mut demuxer = open(&builder, audio_only())?;
                let units = drain(&mut demuxer, StreamKind::Audio);
                assert_eq!(units.len(), 2, "{} packets, unbounded: {}", packets, unbounded);
                assert_eq!(&units[0].data[..], &first[..]);
                assert_eq!(&units[1].data[..], &second[..]);
                assert_eq!(units[0].pts, 0.5);
                assert_eq!(units[1].pts, 0.6);
                assert_eq!(units[1].position, (2 + packets as u64) * TS_PACKET_SIZE as u64);
            }
        }
        Ok(())
    }

    fn audio_units_stream() -> StreamBuilder {
        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &audio_pmt());
        for i in 0..10 {
            let pes = PESPacket::new(0xc0, pattern(300, i)).with_pts(i as f64 * 0.024);
            builder.pes(AUDIO_PID, &pes, 2);
        }
        builder.null_packets(20);
        builder
    }

    /// Rewrites the continuity counter of the `n`th packet of `pid` when
    /// `corrupt(n)` says so.
    fn corrupt_counters(data: &mut [u8], pid: u16, corrupt: impl Fn(usize) -> bool) {
        let mut n = 0;
        for packet in data.chunks_exact_mut(TS_PACKET_SIZE) {
            let packet_pid = ((packet[1] as u16 & 0x1f) << 8) | packet[2] as u16;
            if packet_pid != pid {
                continue;
            }
            if corrupt(n) {
                let cc = packet[3] & 0x0f;
                packet[3] = (packet[3] & 0xf0) | ((cc + 5) & 0x0f);
            }
            n += 1;
        }
    }

    fn units_of(data: Vec<u8>) -> (Vec<(Vec<u8>, f64)>, u64) {
        let source = IoSource::new(Cursor::new(data)).unwrap();
        let mut demuxer = TSDemuxer::open(source, audio_only()).unwrap();
        let units = drain(&mut demuxer, StreamKind::Audio)
            .into_iter()
            .map(|unit| (unit.data.to_vec(), unit.pts))
            .collect();
        (units, demuxer.diagnostics().continuity_errors)
    }

    #[test]
    fn test_continuity_errors_leave_payload_untouched() {
        let clean = audio_units_stream().to_vec();
        let mut corrupted = clean.clone();
        corrupt_counters(&mut corrupted, AUDIO_PID, |n| n % 3 == 2);

        let (expected, clean_errors) = units_of(clean);
        let (actual, errors) = units_of(corrupted);
        assert_eq!(expected.len(), 10);
        assert_eq!(actual, expected);
        assert_eq!(clean_errors, 0);
        assert!(errors > 0);
    }

    #[quickcheck]
    fn prop_continuity_counters_never_change_units(mask: Vec<bool>) -> bool {
        let clean = audio_units_stream().to_vec();
        let mut corrupted = clean.clone();
        corrupt_counters(&mut corrupted, AUDIO_PID, |n| mask.get(n).copied().unwrap_or(false));
        units_of(clean).0 == units_of(corrupted).0
    }

    #[test]
    fn test_private_stream_sniffing_beats_pmt_declaration() -> Result<()> {
        let ac3_pid = 0x102;
        let pmt = PMT::new(1, ac3_pid).with_stream(ElementaryStreamInfo::new(0x04, ac3_pid));
        let payload = [0x0b, 0x77, 0x01, 0x02, 0x03];

        let mut builder = StreamBuilder::new();
        builder
            .pat(&single_program_pat())
            .pmt(PMT_PID, &pmt)
            .pes(ac3_pid, &PESPacket::new(0xbd, payload.to_vec()).with_pts(0.1), 1)
            .null_packets(40);

        let mut demuxer = open(&builder, audio_only())?;
        assert_eq!(demuxer.stream_type(StreamKind::Audio), Some(StreamType::AudioAc3));
        let unit = demuxer.next_unit(StreamKind::Audio)?.unwrap();
        assert_eq!(unit.stream_type, StreamType::AudioAc3);
        assert_eq!(&unit.data[..], &payload[..]);
        assert_eq!(demuxer.stream_state(ac3_pid).unwrap().declared_type, StreamType::AudioMp2);
        Ok(())
    }

    #[test]
    fn test_lpcm_sniffed_without_any_tables() -> Result<()> {
        let pid = 0x1c0;
        let mut payload = vec![0xa0, 0x06, 0x00, 0x04, 0x01, 0x80];
        payload.extend(pattern(100, 5));

        let mut builder = StreamBuilder::new();
        builder
            .pes(pid, &PESPacket::new(0xbd, payload.clone()).with_pts(2.0), 1)
            .null_packets(40);

        let mut demuxer = open(&builder, audio_only())?;
        assert_eq!(demuxer.selected_pids(), (None, Some(pid)));
        assert_eq!(demuxer.program_id(), None);
        let unit = demuxer.next_unit(StreamKind::Audio)?.unwrap();
        assert_eq!(unit.stream_type, StreamType::AudioLpcm);
        assert_eq!(&unit.data[..], &payload[6..]);
        Ok(())
    }

    #[test]
    fn test_pmt_across_packets_resolves_types() -> Result<()> {
        let mut pmt = PMT::new(1, VIDEO_PID)
            .with_stream(ElementaryStreamInfo::new(0x02, VIDEO_PID))
            .with_stream(ElementaryStreamInfo::new(0x03, AUDIO_PID))
            .with_stream(ElementaryStreamInfo::new(0x11, 0x102))
            .with_stream(ElementaryStreamInfo::new(0x06, 0x103).with_descriptor(0x6a, &[0x00]))
            .with_stream(ElementaryStreamInfo::new(0x06, 0x104));
        pmt.program_descriptors.push(tsdemux::format::ts::types::Descriptor {
            tag: 0x80,
            data: vec![0x55; 200],
        });

        let mut builder = StreamBuilder::new();
        builder
            .pat(&single_program_pat())
            .pmt(PMT_PID, &pmt)
            .pes(VIDEO_PID, &PESPacket::new(0xe0, pattern(100, 0)).with_pts(0.0), 1)
            .pes(AUDIO_PID, &PESPacket::new(0xc0, pattern(100, 0)).with_pts(0.0), 1)
            .null_packets(40);

        let demuxer = open(&builder, DemuxConfig::default())?;
        let parsed = demuxer.pmt(1).expect("PMT decoded");
        let resolved: Vec<_> = parsed.elementary_stream_infos.iter().map(|i| i.resolved).collect();
        assert_eq!(
            resolved,
            vec![
                StreamType::VideoMpeg2,
                StreamType::AudioMp2,
                StreamType::AudioAac,
                StreamType::AudioAc3,
                StreamType::Unknown,
            ]
        );
        assert_eq!(parsed.program_descriptors[0].data.len(), 200);
        assert_eq!(demuxer.stream_state(0x103).unwrap().declared_type, StreamType::AudioAc3);
        assert_eq!(demuxer.stream_state(0x104).unwrap().program, Some(1));
        assert_eq!(demuxer.pat().unwrap().pmt_pid(1), Some(PMT_PID));
        Ok(())
    }

    #[test]
    fn test_fec_packets_after_garbage() -> Result<()> {
        let payload = pattern(400, 2);
        let mut builder = StreamBuilder::new().with_fec();
        builder
            .garbage(&[0x00; 100])
            .pat(&single_program_pat())
            .pmt(PMT_PID, &av_pmt())
            .pes(VIDEO_PID, &PESPacket::new(0xe0, payload.clone()).with_pts(4.0), 3)
            .null_packets(40);

        let mut demuxer = open(&builder, DemuxConfig::default())?;
        assert_eq!(demuxer.packet_size(), PacketSize::Fec);
        let unit = demuxer.next_unit(StreamKind::Video)?.unwrap();
        assert_eq!(&unit.data[..], &payload[..]);
        assert_eq!(unit.position, 100 + 2 * 204);
        Ok(())
    }

    fn video_only() -> DemuxConfig {
        DemuxConfig {
            audio: PidRequest::Disabled,
            ..DemuxConfig::default()
        }
    }

    fn unbounded_video(fill: u8, len: usize, pts: f64) -> PESPacket {
        PESPacket::new(0xe0, vec![fill; len]).with_pts(pts).unbounded()
    }

    #[test]
    fn test_pes_header_split_across_packets() -> Result<()> {
        // the header of the middle unit is 14 bytes long
        for cut in [1usize, 6, 9, 11, 13] {
            let mut builder = StreamBuilder::new();
            builder
                .pat(&single_program_pat())
                .pmt(PMT_PID, &av_pmt())
                .pes(VIDEO_PID, &unbounded_video(0xaa, 300, 1.0), 2)
                .pes_at(VIDEO_PID, &unbounded_video(0xbb, 100, 2.0), &[cut])
                .pes(VIDEO_PID, &unbounded_video(0xcc, 300, 3.0), 2)
                .null_packets(40);

            let mut demuxer = open(&builder, video_only())?;
            let units = drain(&mut demuxer, StreamKind::Video);
            assert_eq!(units.len(), 3, "cut after {} bytes", cut);
            assert_eq!(&units[0].data[..], &[0xaa; 300][..]);
            assert_eq!(&units[1].data[..], &[0xbb; 100][..]);
            assert_eq!(units[1].pts, 2.0);
            assert_eq!(units[1].position, 4 * TS_PACKET_SIZE as u64);
            assert!(!units[1].broken);
            assert_eq!(&units[2].data[..], &[0xcc; 300][..]);

            let diagnostics = demuxer.diagnostics();
            assert_eq!(diagnostics.pes_errors, 0);
            assert_eq!(diagnostics.broken_units_dropped, 0);
        }
        Ok(())
    }

    #[test]
    fn test_unparsable_pes_start_breaks_its_unit() -> Result<()> {
        // '00' where the '10' marker bits belong
        let mut bad_start = vec![0x00, 0x00, 0x01, 0xe0, 0x00, 0x00, 0x00, 0x00, 0x00];
        bad_start.extend_from_slice(&[0xdd; 100]);

        let mut builder = StreamBuilder::new();
        builder
            .pat(&single_program_pat())
            .pmt(PMT_PID, &av_pmt())
            .pes(VIDEO_PID, &unbounded_video(0xaa, 300, 1.0), 2)
            .packet(VIDEO_PID, true, &bad_start)
            .packet(VIDEO_PID, false, &[0xdd; 150])
            .pes(VIDEO_PID, &unbounded_video(0xcc, 300, 3.0), 2)
            .null_packets(40);

        let mut demuxer = open(&builder, video_only())?;
        let units = drain(&mut demuxer, StreamKind::Video);
        assert_eq!(units.len(), 2);
        assert_eq!(&units[0].data[..], &[0xaa; 300][..]);
        assert_eq!(&units[1].data[..], &[0xcc; 300][..]);
        let diagnostics = demuxer.diagnostics();
        assert_eq!(diagnostics.pes_errors, 1);
        assert_eq!(diagnostics.broken_units_dropped, 1);

        let config = DemuxConfig {
            keep_broken: true,
            ..video_only()
        };
        let mut demuxer = open(&builder, config)?;
        let units = drain(&mut demuxer, StreamKind::Video);
        assert_eq!(units.len(), 3);
        assert_eq!(&units[0].data[..], &[0xaa; 300][..]);
        assert!(!units[0].broken);
        assert!(units[1].broken);
        assert_eq!(&units[1].data[..], &[0xdd; 150][..]);
        assert_eq!(units[1].position, 4 * TS_PACKET_SIZE as u64);
        assert_eq!(units[1].pts, 1.0);
        assert!(!units[2].broken);
        Ok(())
    }

    #[test]
    fn test_resync_inside_unit_breaks_it() -> Result<()> {
        let mut builder = StreamBuilder::new();
        builder
            .null_packets(40)
            .pat(&single_program_pat())
            .pmt(PMT_PID, &av_pmt())
            .pes(VIDEO_PID, &unbounded_video(0xaa, 1000, 1.0), 6)
            .pes(VIDEO_PID, &unbounded_video(0xcc, 300, 2.0), 2)
            .null_packets(30);

        // 100 bytes go missing inside the third packet of the first unit
        let mut data = builder.to_vec();
        let third = 44 * TS_PACKET_SIZE;
        let tail = data.split_off(third + 150);
        data.truncate(third + 50);
        data.extend_from_slice(&tail);

        let source = IoSource::new(Cursor::new(data.clone()))?;
        let mut demuxer = TSDemuxer::open(source, video_only())?;
        let units = drain(&mut demuxer, StreamKind::Video);
        assert_eq!(units.len(), 1);
        assert_eq!(&units[0].data[..], &[0xcc; 300][..]);
        assert_eq!(units[0].pts, 2.0);
        let diagnostics = demuxer.diagnostics();
        assert_eq!(diagnostics.resyncs, 1);
        assert_eq!(diagnostics.broken_units_dropped, 1);

        let config = DemuxConfig {
            keep_broken: true,
            ..video_only()
        };
        let source = IoSource::new(Cursor::new(data))?;
        let mut demuxer = TSDemuxer::open(source, config)?;
        let units = drain(&mut demuxer, StreamKind::Video);
        assert_eq!(units.len(), 2);
        assert!(units[0].broken);
        assert_eq!(units[0].pts, 1.0);
        assert!(units[0].len() < 1000);
        assert!(!units[1].broken);
        Ok(())
    }

    #[test]
    fn test_clean_stream_reports_no_backward_pts() -> Result<()> {
        let mut builder = StreamBuilder::new();
        builder
            .pat(&single_program_pat())
            .pmt(PMT_PID, &av_pmt())
            .pes(VIDEO_PID, &PESPacket::new(0xe0, pattern(400, 0)).with_pts(1.0), 3)
            .pes(VIDEO_PID, &PESPacket::new(0xe0, pattern(400, 1)).with_pts(2.0), 3)
            .null_packets(30);

        // no audio: probing reads the whole stream
        let mut demuxer = open(&builder, DemuxConfig::default())?;
        let units = drain(&mut demuxer, StreamKind::Video);
        assert_eq!(units.iter().map(|u| u.pts).collect::<Vec<_>>(), vec![1.0, 2.0]);
        assert_eq!(demuxer.diagnostics().pts_backward, 0);
        assert_eq!(demuxer.stream_state(VIDEO_PID).unwrap().pts_backward, 0);
        Ok(())
    }

    #[test]
    fn test_missing_pts_reuses_last() -> Result<()> {
        let mut builder = StreamBuilder::new();
        builder
            .pat(&single_program_pat())
            .pmt(PMT_PID, &audio_pmt())
            .pes(AUDIO_PID, &PESPacket::new(0xc0, pattern(100, 0)).with_pts(3.0), 1)
            .pes(AUDIO_PID, &PESPacket::new(0xc0, pattern(100, 1)), 1)
            .null_packets(40);

        let mut demuxer = open(&builder, audio_only())?;
        let units = drain(&mut demuxer, StreamKind::Audio);
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].pts, 3.0);
        Ok(())
    }

    #[test]
    fn test_pinned_and_disabled_requests() -> Result<()> {
        let second_audio = 0x102;
        let pmt = av_pmt().with_stream(ElementaryStreamInfo::new(0x03, second_audio));
        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &pmt);
        for i in 0..4 {
            let pts = i as f64;
            builder
                .pes(VIDEO_PID, &PESPacket::new(0xe0, pattern(120, i)).with_pts(pts), 1)
                .pes(AUDIO_PID, &PESPacket::new(0xc0, pattern(120, i)).with_pts(pts), 1)
                .pes(second_audio, &PESPacket::new(0xc1, pattern(120, i + 1)).with_pts(pts), 1);
        }
        builder.null_packets(30);

        let config = DemuxConfig {
            video: PidRequest::Disabled,
            audio: PidRequest::Pid(second_audio),
            ..DemuxConfig::default()
        };
        let mut demuxer = open(&builder, config)?;
        assert_eq!(demuxer.selected_pids(), (None, Some(second_audio)));
        assert!(demuxer.next_unit(StreamKind::Video)?.is_none());
        let units = drain(&mut demuxer, StreamKind::Audio);
        assert_eq!(units.len(), 4);
        assert!(units.iter().all(|u| u.pid == second_audio));
        assert_eq!(&units[0].data[..], &pattern(120, 1)[..]);

        // a pinned PID nothing is sent on stays selected
        let config = DemuxConfig {
            audio: PidRequest::Pid(0x1ff),
            ..DemuxConfig::default()
        };
        let mut demuxer = open(&builder, config)?;
        assert_eq!(demuxer.selected_pids(), (Some(VIDEO_PID), Some(0x1ff)));
        assert!(demuxer.next_unit(StreamKind::Audio)?.is_none());
        assert_eq!(drain(&mut demuxer, StreamKind::Video).len(), 4);
        Ok(())
    }

    #[test]
    fn test_late_video_is_missed_by_audio_only_probe() -> Result<()> {
        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &av_pmt());
        // about 94 KiB of audio before the first video unit
        for i in 0..500 {
            builder.pes(AUDIO_PID, &PESPacket::new(0xc0, vec![0x5a; 150]).with_pts(i as f64 * 0.024), 1);
        }
        builder.pes(VIDEO_PID, &PESPacket::new(0xe0, pattern(150, 0)).with_pts(12.0), 1);

        let demuxer = open(&builder, DemuxConfig::default())?;
        assert_eq!(demuxer.selected_pids(), (None, Some(AUDIO_PID)));

        let config = DemuxConfig {
            audio_only_probe_limit: 200_000,
            ..DemuxConfig::default()
        };
        let demuxer = open(&builder, config)?;
        assert_eq!(demuxer.selected_pids(), (Some(VIDEO_PID), Some(AUDIO_PID)));
        Ok(())
    }

    #[test]
    fn test_audio_only_limit_counts_from_audio_pick() -> Result<()> {
        let mut builder = StreamBuilder::new();
        builder
            .pat(&single_program_pat())
            .pmt(PMT_PID, &av_pmt())
            // about 55 KiB before any audio
            .null_packets(300);
        for i in 0..150 {
            builder.pes(AUDIO_PID, &PESPacket::new(0xc0, vec![0x5a; 150]).with_pts(i as f64 * 0.024), 1);
        }
        builder
            .pes(VIDEO_PID, &PESPacket::new(0xe0, pattern(150, 0)).with_pts(4.0), 1)
            .null_packets(10);

        let demuxer = open(&builder, DemuxConfig::default())?;
        assert_eq!(demuxer.selected_pids(), (Some(VIDEO_PID), Some(AUDIO_PID)));
        Ok(())
    }

    #[test]
    fn test_nothing_playable() {
        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &av_pmt()).null_packets(40);
        assert!(matches!(
            open(&builder, DemuxConfig::default()),
            Err(DemuxError::NoPlayableStreams)
        ));
    }

    #[test]
    fn test_pmt_update_reselects_audio() -> Result<()> {
        let new_audio = 0x103;
        let mut updated = PMT::new(1, VIDEO_PID)
            .with_stream(ElementaryStreamInfo::new(0x02, VIDEO_PID))
            .with_stream(ElementaryStreamInfo::new(0x03, new_audio));
        updated.header.version_number = 1;

        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &av_pmt());
        for i in 0..3 {
            builder
                .pes(VIDEO_PID, &PESPacket::new(0xe0, pattern(120, i)).with_pts(i as f64), 1)
                .pes(AUDIO_PID, &PESPacket::new(0xc0, pattern(120, i)).with_pts(i as f64), 1);
        }
        builder.pmt(PMT_PID, &updated);
        for i in 3..6 {
            builder
                .pes(VIDEO_PID, &PESPacket::new(0xe0, pattern(120, i)).with_pts(i as f64), 1)
                .pes(new_audio, &PESPacket::new(0xc0, pattern(120, i)).with_pts(i as f64), 1);
        }
        builder.null_packets(30);

        let mut demuxer = open(&builder, DemuxConfig::default())?;
        assert_eq!(demuxer.selected_pids(), (Some(VIDEO_PID), Some(AUDIO_PID)));

        let video = drain(&mut demuxer, StreamKind::Video);
        assert_eq!(video.len(), 6);
        assert_eq!(demuxer.selected_pids(), (Some(VIDEO_PID), Some(new_audio)));
        assert_eq!(demuxer.pmt(1).unwrap().header.version_number, 1);

        let audio = drain(&mut demuxer, StreamKind::Audio);
        assert!(!audio.is_empty());
        assert!(audio.iter().all(|u| u.pid == new_audio));
        assert_eq!(audio.last().unwrap().pts, 5.0);
        Ok(())
    }

    #[test]
    fn test_ready_queue_is_bounded() -> Result<()> {
        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &av_pmt());
        for i in 0..8 {
            builder
                .pes(VIDEO_PID, &PESPacket::new(0xe0, pattern(120, i)).with_pts(i as f64), 1)
                .pes(AUDIO_PID, &PESPacket::new(0xc0, pattern(120, i)).with_pts(i as f64), 1);
        }
        builder.null_packets(20);

        let config = DemuxConfig {
            max_queued_units: 2,
            ..DemuxConfig::default()
        };
        let mut demuxer = open(&builder, config)?;
        assert_eq!(drain(&mut demuxer, StreamKind::Video).len(), 8);
        assert_eq!(demuxer.diagnostics().queued_units_dropped, 6);

        let audio = drain(&mut demuxer, StreamKind::Audio);
        assert_eq!(audio.iter().map(|u| u.pts).collect::<Vec<_>>(), vec![6.0, 7.0]);
        Ok(())
    }

    #[test]
    fn test_transport_error_packets_are_skipped() -> Result<()> {
        let mut builder = StreamBuilder::new();
        builder
            .pat(&single_program_pat())
            .pmt(PMT_PID, &av_pmt())
            .pes(VIDEO_PID, &PESPacket::new(0xe0, pattern(120, 0)).with_pts(0.0), 1)
            .pes_with(
                AUDIO_PID,
                &PESPacket::new(0xc0, pattern(120, 0)).with_pts(0.0),
                1,
                PacketFlags {
                    transport_error: true,
                    ..PacketFlags::default()
                },
            )
            .null_packets(40);

        let mut demuxer = open(&builder, DemuxConfig::default())?;
        assert_eq!(demuxer.selected_pids(), (Some(VIDEO_PID), None));
        drain(&mut demuxer, StreamKind::Video);
        assert_eq!(demuxer.diagnostics().transport_errors, 1);
        Ok(())
    }

    /// Audio-only constant bitrate stream, one 160-byte unit per packet,
    /// PTS derived from the byte position.
    fn cbr_audio_stream(seconds: f64, bytes_per_second: f64) -> StreamBuilder {
        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &audio_pmt());
        let total = (seconds * bytes_per_second) as usize;
        let mut i = 0u8;
        while builder.len() < total {
            let pts = builder.len() as f64 / bytes_per_second;
            builder.pes(AUDIO_PID, &PESPacket::new(0xc0, vec![0xa0 | (i & 0x0f); 160]).with_pts(pts), 1);
            i = i.wrapping_add(1);
        }
        builder
    }

    #[test]
    fn test_fraction_seek_lands_within_a_chunk() -> Result<()> {
        // 10 seconds at 2 Mbit/s
        let builder = cbr_audio_stream(10.0, 250_000.0);
        let size = builder.len() as f64;
        let mut demuxer = open(&builder, DemuxConfig::default())?;
        assert_eq!(demuxer.selected_pids(), (None, Some(AUDIO_PID)));

        demuxer.seek(SeekTarget::Fraction(0.5), true)?;
        let unit = demuxer.next_unit(StreamKind::Audio)?.unwrap();
        let target = size * 0.5;
        assert!(
            (unit.position as f64 - target).abs() <= (2048 + TS_PACKET_SIZE) as f64,
            "landed at {} for {}",
            unit.position,
            target
        );
        assert!((unit.pts - 5.0).abs() < 0.02, "pts {}", unit.pts);
        assert_eq!(unit.len(), 160);

        // a quarter of the stream further on
        demuxer.seek(SeekTarget::Fraction(0.25), false)?;
        let unit = demuxer.next_unit(StreamKind::Audio)?.unwrap();
        assert!((unit.pts - 7.5).abs() < 0.02, "pts {}", unit.pts);

        // clamped to the end, only the last chunk is left
        demuxer.seek(SeekTarget::Fraction(2.0), true)?;
        while let Some(unit) = demuxer.next_unit(StreamKind::Audio)? {
            assert!(unit.pts > 9.9, "pts {}", unit.pts);
        }

        demuxer.seek(SeekTarget::Fraction(0.0), true)?;
        let first = demuxer.next_unit(StreamKind::Audio)?.unwrap();
        assert_eq!(first.position, 2 * TS_PACKET_SIZE as u64);
        assert!((first.pts - 2.0 * 188.0 / 250_000.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_time_seek_uses_estimated_bitrate() -> Result<()> {
        let builder = cbr_audio_stream(10.0, 250_000.0);
        let mut demuxer = open(&builder, DemuxConfig::default())?;

        let rate = demuxer.bitrate().expect("bitrate from PTS");
        assert!((rate - 250_000.0).abs() < 1_000.0, "rate {}", rate);

        demuxer.seek(SeekTarget::Seconds(2.0), true)?;
        let unit = demuxer.next_unit(StreamKind::Audio)?.unwrap();
        assert!((unit.pts - 2.0).abs() < 0.02, "pts {}", unit.pts);

        demuxer.seek(SeekTarget::Seconds(1.0), false)?;
        let unit = demuxer.next_unit(StreamKind::Audio)?.unwrap();
        assert!((unit.pts - 3.0).abs() < 0.02, "pts {}", unit.pts);

        assert!(matches!(
            demuxer.seek(SeekTarget::Seconds(f64::NAN), true),
            Err(DemuxError::Seek(SeekError::OutOfRange(_)))
        ));
        Ok(())
    }

    #[test]
    fn test_time_seek_without_clock_needs_default_bitrate() -> Result<()> {
        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &audio_pmt());
        for i in 0..60 {
            builder.pes(AUDIO_PID, &PESPacket::new(0xc0, vec![i; 160]), 1);
        }

        let mut demuxer = open(&builder, audio_only())?;
        assert_eq!(demuxer.bitrate(), None);
        assert!(matches!(
            demuxer.seek(SeekTarget::Seconds(1.0), true),
            Err(DemuxError::Seek(SeekError::NotSeekable))
        ));

        let config = DemuxConfig {
            default_bitrate: Some(188 * 10),
            ..audio_only()
        };
        let source = IoSource::new(Cursor::new(builder.to_vec()))?.with_chunk_size(188);
        let mut demuxer = TSDemuxer::open(source, config)?;
        demuxer.seek(SeekTarget::Seconds(2.0), true)?;
        let unit = demuxer.next_unit(StreamKind::Audio)?.unwrap();
        assert_eq!(unit.position, 20 * 188);
        Ok(())
    }

    /// Audio units of 500 bytes spread over 3 packets each.
    fn three_packet_units(count: usize) -> StreamBuilder {
        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &audio_pmt());
        for i in 0..count {
            let pes = PESPacket::new(0xc0, vec![0xa0 | (i as u8 & 0x0f); 500]).with_pts(i as f64 * 0.1);
            builder.pes(AUDIO_PID, &pes, 3);
        }
        builder
    }

    #[test]
    fn test_seek_drops_unit_without_start() -> Result<()> {
        let builder = three_packet_units(100);
        let half = builder.len() / 2;
        let landing = half.div_ceil(TS_PACKET_SIZE);
        // lands on a continuation packet
        assert_ne!((landing - 2) % 3, 0);
        let next_start = 2 + (landing - 2).div_ceil(3) * 3;

        let source = IoSource::new(Cursor::new(builder.to_vec()))?.with_chunk_size(1);
        let mut demuxer = TSDemuxer::open(source, audio_only())?;
        demuxer.seek(SeekTarget::Fraction(0.5), true)?;
        let unit = demuxer.next_unit(StreamKind::Audio)?.unwrap();
        assert_eq!(unit.position, (next_start * TS_PACKET_SIZE) as u64);
        assert_eq!(unit.len(), 500);
        assert!(!unit.broken);
        assert_eq!(demuxer.diagnostics().broken_units_dropped, 1);

        let config = DemuxConfig {
            keep_broken: true,
            ..audio_only()
        };
        let source = IoSource::new(Cursor::new(builder.to_vec()))?.with_chunk_size(1);
        let mut demuxer = TSDemuxer::open(source, config)?;
        demuxer.seek(SeekTarget::Fraction(0.5), true)?;
        let unit = demuxer.next_unit(StreamKind::Audio)?.unwrap();
        assert!(unit.broken);
        assert!(unit.len() < 500);
        assert_eq!(unit.position, (landing * TS_PACKET_SIZE) as u64);
        Ok(())
    }

    #[test]
    fn test_seek_aligns_on_video_keyframe() -> Result<()> {
        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &av_pmt());
        for i in 0..200u32 {
            let mut payload = if i % 10 == 0 {
                vec![0x00, 0x00, 0x01, 0xb3]
            } else {
                vec![0x00, 0x00, 0x01, 0x00]
            };
            payload.extend(vec![0xa5; 290]);
            let pts = i as f64 * 0.04;
            builder
                .pes(VIDEO_PID, &PESPacket::new(0xe0, payload).with_pts(pts), 2)
                .pes(AUDIO_PID, &PESPacket::new(0xc0, vec![0xa1; 100]).with_pts(pts), 1);
        }

        let size = builder.len() as u64;
        let mut demuxer = open(&builder, DemuxConfig::default())?;
        demuxer.seek(SeekTarget::Fraction(0.43), true)?;

        let unit = demuxer.next_unit(StreamKind::Video)?.unwrap();
        assert_eq!(&unit.data[..4], &[0x00, 0x00, 0x01, 0xb3]);
        assert!(unit.position + 2048 >= size * 43 / 100);
        let frame = (unit.pts / 0.04).round() as u32;
        assert_eq!(frame % 10, 0);

        let audio = demuxer.next_unit(StreamKind::Audio)?.unwrap();
        assert!(audio.pts >= unit.pts);
        Ok(())
    }

    #[test]
    fn test_video_keyframe_from_random_access_flag() -> Result<()> {
        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &av_pmt());
        for i in 0..100u32 {
            let pes = PESPacket::new(0xe0, vec![0x11; 150]).with_pts(i as f64 * 0.04);
            let flags = PacketFlags {
                random_access: i % 7 == 0,
                ..PacketFlags::default()
            };
            builder.pes_with(VIDEO_PID, &pes, 1, flags);
        }

        let config = DemuxConfig {
            audio: PidRequest::Disabled,
            ..DemuxConfig::default()
        };
        let mut demuxer = open(&builder, config)?;
        demuxer.seek(SeekTarget::Fraction(0.5), true)?;
        let unit = demuxer.next_unit(StreamKind::Video)?.unwrap();
        let frame = (unit.pts / 0.04).round() as u32;
        assert_eq!(frame % 7, 0);
        Ok(())
    }

    #[test]
    fn test_pcr_drives_bitrate() -> Result<()> {
        let mut builder = StreamBuilder::new();
        builder.pat(&single_program_pat()).pmt(PMT_PID, &audio_pmt());
        // one packet every 1/1000 s: 188_000 bytes per second
        for _ in 0..400 {
            let pes = PESPacket::new(0xc0, vec![0x33; 100]);
            let flags = PacketFlags {
                pcr: Some((builder.len() as u64 / 188) * 27_000),
                ..PacketFlags::default()
            };
            builder.pes_with(AUDIO_PID, &pes, 1, flags);
        }

        // no video: probing runs to the audio-only limit
        let demuxer = open(&builder, DemuxConfig::default())?;
        let rate = demuxer.bitrate().unwrap();
        assert!((rate - 188_000.0).abs() < 1.0, "rate {}", rate);
        Ok(())
    }
}
