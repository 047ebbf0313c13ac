use super::{
    last_period, parse_feedback, BitrateFractionWindow, CcfsConfig, ControlEvent, ControlSignals,
    DelayIncreaseDetectorInterface, FeedbackSequenceTracker, ForwardBandwidthEstimator,
    IncreasingDelayDetector, QueueDelayEstimate, QueueDelayEstimator, RateController,
    SentPacketLedger,
};
use crate::{
    api::{
        congestion_signals::{CongestionSignals, FixedCongestionSignals},
        network_control::NetworkControllerInterface,
        network_queue_monitor::NetworkQueueMonitor,
        transport::{ControlUpdate, NetRemains, SenderState, SentPacket},
        units::{DataRate, TimeDelta, Timestamp},
    },
    rtp_rtcp::FeedbackReport,
    Error, Result,
};

/// A snapshot of the controller after the last report.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CcfsStats {
    pub state: SenderState,
    pub target_rate: DataRate,
    pub target_queue_delay: TimeDelta,
    pub estimated_bandwidth: Option<DataRate>,
    pub received_rate: DataRate,
    pub queue_delay: QueueDelayEstimate,
    pub increasing: TimeDelta,
    pub br_fraction: Option<f64>,
    pub loss_rate: f64,
    pub ecn_rate: f64,
    pub last_event: ControlEvent,
    pub qd_fraction: f64,
    pub xq_fraction: f64,
    pub virtual_queue_bandwidth: DataRate,
    pub virtual_queue_correlation: f64,
    pub net_remains: NetRemains,
    pub received_reports: u64,
    pub rejected_reports: u64,
    pub lost_reports: u64,
    pub ledger_misses: u64,
}

/// Congestion Control with Feedback Signals.
///
/// Every packet handed to the network goes through
/// [on_sent_packet](NetworkControllerInterface::on_sent_packet); every
/// receiver report through [on_feedback](NetworkControllerInterface::on_feedback),
/// which returns the new target rate.
pub struct CcfsController {
    config: CcfsConfig,

    ledger: SentPacketLedger,
    sequence_tracker: FeedbackSequenceTracker,
    bitrate_fraction: BitrateFractionWindow,
    bandwidth: ForwardBandwidthEstimator,
    queue_delay: QueueDelayEstimator,
    increase_detector: Box<dyn DelayIncreaseDetectorInterface>,
    rate_control: RateController,

    queue_monitor: Option<Box<dyn NetworkQueueMonitor>>,
    congestion_signals: Box<dyn CongestionSignals>,

    stats: CcfsStats,
}

impl Default for CcfsController {
    fn default() -> Self {
        Self::new(CcfsConfig::default())
    }
}

impl CcfsController {
    pub fn new(mut config: CcfsConfig) -> Self {
        config.validate();
        tracing::info!("CCFS config {:?}", config);

        let mut controller = Self {
            ledger: SentPacketLedger::new(config.sent_packet_retention),
            sequence_tracker: FeedbackSequenceTracker::default(),
            bitrate_fraction: BitrateFractionWindow::new(config.bandwidth.fraction_window),
            bandwidth: ForwardBandwidthEstimator::new(
                &config.bandwidth,
                config.min_bitrate,
                config.max_bitrate,
            ),
            queue_delay: QueueDelayEstimator::new(&config.queue_delay, config.bandwidth.headroom),
            increase_detector: Box::new(IncreasingDelayDetector::new(
                config.queue_delay.increase_min_count,
                config.queue_delay.increase_min_duration,
            )),
            rate_control: RateController::new(
                config.rate_control.clone(),
                config.min_bitrate,
                config.max_bitrate,
                config.start_bitrate,
            ),
            queue_monitor: None,
            congestion_signals: Box::new(FixedCongestionSignals::default()),
            stats: CcfsStats::default(),
            config,
        };
        controller.reset_stats();
        controller
    }

    /// Attaches a bottleneck queue sensor. Its readings are only logged.
    pub fn with_queue_monitor(mut self, monitor: Box<dyn NetworkQueueMonitor>) -> Self {
        self.queue_monitor = Some(monitor);
        self
    }

    pub fn with_congestion_signals(mut self, signals: Box<dyn CongestionSignals>) -> Self {
        self.congestion_signals = signals;
        self
    }

    pub fn with_delay_increase_detector(
        mut self,
        detector: Box<dyn DelayIncreaseDetectorInterface>,
    ) -> Self {
        self.increase_detector = detector;
        self
    }

    pub fn config(&self) -> &CcfsConfig {
        &self.config
    }

    pub fn stats(&self) -> CcfsStats {
        self.stats
    }

    pub fn state(&self) -> SenderState {
        self.rate_control.state()
    }

    pub fn estimated_bandwidth(&self) -> Option<DataRate> {
        self.bandwidth.estimate()
    }

    fn process_feedback(
        &mut self,
        at_time: Timestamp,
        report: &FeedbackReport,
    ) -> Result<ControlUpdate> {
        if report.report_blocks().next().is_none() {
            return Err(Error::EmptyFeedback);
        }

        self.stats.net_remains = self.ledger.net_remains(report);
        self.observe_queue(report);

        if report.total_report_count() == 0 {
            return Err(Error::EmptyFeedback);
        }
        self.stats.received_reports += 1;

        let period = last_period(report, &self.ledger)?;
        let parsed = parse_feedback(report, &self.ledger, &period);
        self.stats.ledger_misses += parsed.ledger_misses as u64;

        // Late acknowledgements count too, so the fraction may exceed one.
        let br_fraction = self
            .bitrate_fraction
            .update(&period, parsed.rxed_bytes, parsed.txed_bytes);

        self.congestion_signals.on_feedback(report);
        let loss_rate = self.congestion_signals.loss_rate();
        let ecn_rate = self.congestion_signals.ecn_rate();

        let diff = self.bandwidth.update(
            &parsed,
            period.duration(),
            self.rate_control.state(),
            self.rate_control.target_rate(),
            loss_rate,
        );

        let queue_delay = self
            .queue_delay
            .update(&period, &parsed, self.bandwidth.estimate());
        let increasing = self
            .increase_detector
            .update(queue_delay.latest, period.end_ms);

        let signals = ControlSignals {
            queue_delay,
            increasing,
            br_fraction,
            loss_rate,
            ecn_rate,
        };
        let decision = self.rate_control.classify(
            at_time,
            self.ledger.session_start(),
            self.bandwidth.estimate(),
            &signals,
        );

        // Competing flows inflate the received rate while the queue builds.
        if self.rate_control.state() == SenderState::Competing
            && decision.qd_fraction >= self.config.rate_control.competing_rollback_qd_fraction
            && diff > DataRate::zero()
        {
            self.bandwidth.roll_back(diff);
        }

        self.rate_control
            .apply(at_time, &decision, self.bandwidth.estimate());

        let virtual_queue = self.queue_delay.virtual_queue();
        self.stats = CcfsStats {
            state: self.rate_control.state(),
            target_rate: self.rate_control.target_rate(),
            target_queue_delay: self.rate_control.target_queue_delay(),
            estimated_bandwidth: self.bandwidth.estimate(),
            received_rate: self.bandwidth.received_rate(),
            queue_delay,
            increasing,
            br_fraction,
            loss_rate,
            ecn_rate,
            last_event: decision.event,
            qd_fraction: decision.qd_fraction,
            xq_fraction: decision.xq_fraction,
            virtual_queue_bandwidth: virtual_queue.bandwidth(),
            virtual_queue_correlation: virtual_queue.correlation(),
            lost_reports: self.sequence_tracker.lost(),
            ..self.stats
        };

        tracing::info!(
            feedback_seq = report.feedback_seq(),
            state = %self.stats.state,
            event = %decision.event,
            target_rate = ?self.stats.target_rate,
            estimate = ?self.stats.estimated_bandwidth,
            received = ?self.stats.received_rate,
            queue_delay = ?queue_delay.latest,
            target_queue_delay = ?self.stats.target_queue_delay,
            range = ?queue_delay.window_range,
            cross_traffic = ?queue_delay.cross_traffic,
            increasing = ?increasing,
            qd_fraction = decision.qd_fraction,
            br_fraction = ?br_fraction,
            losses = parsed.loss_count,
            in_flight = self.stats.net_remains.packets,
            "ccfs stats"
        );

        Ok(ControlUpdate {
            at_time,
            target_rate: self.stats.target_rate,
            target_queue_delay: self.stats.target_queue_delay,
            estimated_bandwidth: self.stats.estimated_bandwidth,
            state: self.stats.state,
        })
    }

    fn observe_queue(&mut self, report: &FeedbackReport) {
        let Some(monitor) = self.queue_monitor.as_mut() else {
            return;
        };
        let Some((ssrc, block)) = report.report_blocks().next() else {
            return;
        };

        let seq = block.end_seq();
        match monitor.query(ssrc, seq) {
            Some(snapshot) => {
                tracing::debug!(
                    ssrc,
                    seq,
                    packets = snapshot.packets,
                    bytes = ?snapshot.bytes,
                    delay = ?snapshot.delay,
                    "bottleneck queue"
                );
                monitor.prune(snapshot.at_time);
            }
            None => tracing::trace!(ssrc, seq, "no bottleneck queue snapshot"),
        }
    }

    fn reset_stats(&mut self) {
        self.stats = CcfsStats {
            state: self.rate_control.state(),
            target_rate: self.rate_control.target_rate(),
            target_queue_delay: self.rate_control.target_queue_delay(),
            ..Default::default()
        };
    }
}

impl NetworkControllerInterface for CcfsController {
    fn on_sent_packet(&mut self, sent_packet: SentPacket) {
        let record = self.ledger.record(&sent_packet);
        tracing::trace!(
            ssrc = sent_packet.ssrc,
            seq = sent_packet.sequence_number,
            size = ?record.size,
            total = ?record.total_sent_bytes,
            "sent packet"
        );
    }

    fn on_feedback(
        &mut self,
        at_time: Timestamp,
        report: &FeedbackReport,
    ) -> Result<ControlUpdate> {
        self.sequence_tracker.on_feedback(report.feedback_seq());

        self.process_feedback(at_time, report).map_err(|err| {
            self.stats.rejected_reports += 1;
            tracing::warn!(%err, feedback_seq = report.feedback_seq(), "feedback rejected");
            err
        })
    }

    fn target_rate(&self, _at_time: Timestamp) -> DataRate {
        self.rate_control.target_rate()
    }

    fn reset(&mut self) {
        tracing::info!("CCFS reset");

        self.ledger.restart_session();
        self.sequence_tracker.reset();
        self.bitrate_fraction.reset();
        self.bandwidth.reset();
        self.queue_delay.reset();
        self.increase_detector.reset();
        self.rate_control.reset();
        self.reset_stats();
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use approx::assert_relative_eq;
    use test_trace::test;

    use super::*;
    use crate::{
        api::{
            network_queue_monitor::QueueSnapshot,
            transport::EcnMarking,
            units::DataSize,
        },
        rtp_rtcp::FeedbackGenerator,
    };

    const SSRC: u32 = 0x1234;
    const PACKETS_PER_PERIOD: i64 = 10;
    const PERIOD: TimeDelta = TimeDelta::from_millis(100);
    const PROPAGATION: TimeDelta = TimeDelta::from_millis(50);

    /// A sender and receiver joined by a link with a scripted queue delay.
    struct Session {
        controller: CcfsController,
        generator: FeedbackGenerator,
        now: Timestamp,
        seq: u16,
    }

    impl Session {
        fn new(controller: CcfsController) -> Self {
            Self {
                controller,
                generator: FeedbackGenerator::new(SSRC + 1, PERIOD),
                now: Timestamp::from_millis(10_000),
                seq: 65530,
            }
        }

        // Sends one period of packets, 10 ms apart, and feeds back the report.
        fn period(
            &mut self,
            bytes: i64,
            queue_delay_ms: i64,
            delivered: impl Fn(i64) -> bool,
        ) -> Result<ControlUpdate> {
            let mut last_arrival = None;
            for i in 0..PACKETS_PER_PERIOD {
                let send_time = self.now + TimeDelta::from_millis(10 * i);
                self.controller.on_sent_packet(SentPacket {
                    ssrc: SSRC,
                    sequence_number: self.seq,
                    send_time,
                    size: DataSize::from_bytes(bytes),
                });

                if delivered(i) {
                    let arrival = send_time + PROPAGATION + TimeDelta::from_millis(queue_delay_ms);
                    self.generator
                        .on_received_packet(arrival, SSRC, self.seq, EcnMarking::NotEct);
                    last_arrival = Some(arrival);
                }
                self.seq = self.seq.wrapping_add(1);
            }
            self.now += PERIOD;

            let report_time = last_arrival.unwrap() + TimeDelta::from_millis(1);
            let mut datagram = self.generator.on_interval(report_time).unwrap().unwrap();
            let report = FeedbackReport::decode(&mut datagram).unwrap();

            self.controller.on_feedback(self.now, &report)
        }

        fn steady(&mut self, periods: usize) {
            for _ in 0..periods {
                self.period(1000, 0, |_| true).unwrap();
            }
        }
    }

    fn all(_: i64) -> bool {
        true
    }

    fn even(i: i64) -> bool {
        i % 2 == 0
    }

    #[test]
    fn starts_at_start_bitrate() {
        let controller = CcfsController::default();
        assert_eq!(
            controller.target_rate(Timestamp::zero()),
            DataRate::from_kilobits_per_sec(150)
        );
        assert_eq!(controller.state(), SenderState::Default);
        assert_eq!(controller.estimated_bandwidth(), None);
    }

    #[test]
    fn empty_report_is_rejected() {
        let mut controller = CcfsController::default();
        let report = FeedbackReport::new(1);
        assert_eq!(
            controller.on_feedback(Timestamp::from_millis(100), &report),
            Err(Error::EmptyFeedback)
        );
        assert_eq!(controller.stats().rejected_reports, 1);
        assert_eq!(controller.stats().received_reports, 0);
    }

    #[test]
    fn unknown_packet_is_rejected() {
        let mut controller = CcfsController::default();
        let mut report = FeedbackReport::new(1);
        report.set_monitored_duration(100);
        report.add_feedback(SSRC, 7, 0, 0);

        assert_eq!(
            controller.on_feedback(Timestamp::from_millis(100), &report),
            Err(Error::LedgerMiss { ssrc: SSRC, seq: 7 })
        );
        assert_eq!(controller.estimated_bandwidth(), None);
        assert_eq!(controller.stats().rejected_reports, 1);
    }

    #[test]
    fn first_report_seeds_estimate() {
        let mut session = Session::new(CcfsController::default());

        // 10 kB per 100 ms is 800 kbps, well above the 150 kbps target.
        let update = session.period(1000, 0, all).unwrap();
        assert_eq!(
            update.estimated_bandwidth,
            Some(DataRate::from_kilobits_per_sec(800))
        );
        assert_eq!(update.state, SenderState::Default);

        // Empty queue and room below the estimate: a gentle increase.
        assert_eq!(update.target_rate, DataRate::from_kilobits_per_sec(150) * 1.005);
        assert_eq!(session.controller.stats().received_reports, 1);
        assert_eq!(session.controller.stats().br_fraction, Some(1.0));
    }

    #[test]
    fn bandwidth_within_bounds() {
        let config = CcfsConfig::default();
        let (min, max) = (config.min_bitrate, config.max_bitrate);

        let mut session = Session::new(CcfsController::new(config.clone()));
        for _ in 0..20 {
            let update = session.period(10_000, 0, all).unwrap();
            let estimate = update.estimated_bandwidth.unwrap();
            assert!(estimate >= min && estimate <= max, "{:?}", estimate);
            assert!(update.target_rate >= min && update.target_rate <= max);
        }
        assert_eq!(session.controller.estimated_bandwidth(), Some(max));

        let mut session = Session::new(CcfsController::new(config));
        for _ in 0..20 {
            let update = session.period(10, 0, even).unwrap();
            let estimate = update.estimated_bandwidth.unwrap();
            assert!(estimate >= min && estimate <= max, "{:?}", estimate);
            assert!(update.target_rate >= min && update.target_rate <= max);
        }
        assert_eq!(session.controller.estimated_bandwidth(), Some(min));
    }

    #[test]
    fn throttle_detect_and_resolve() {
        let mut session = Session::new(CcfsController::default());
        session.steady(10);
        assert_eq!(session.controller.state(), SenderState::Default);

        // Half the packets are lost while the queue keeps growing.
        let mut throttled = None;
        for k in 1..=10 {
            let update = session.period(1000, 20 * k, even).unwrap();
            if update.state == SenderState::Throttled {
                throttled = Some((k, update));
                break;
            }
        }
        let (k, update) = throttled.expect("throttle never detected");
        // Needs 500 ms of increase.
        assert_eq!(k, 6);
        assert_eq!(session.controller.stats().last_event, ControlEvent::DetectThrottle);
        assert!(session.controller.stats().br_fraction.unwrap() < 0.9);
        let snapshot = update.estimated_bandwidth.unwrap();

        // The queue drains: back to the estimate from when throttling began.
        let update = session.period(1000, 0, all).unwrap();
        assert_eq!(session.controller.stats().last_event, ControlEvent::ResolveThrottle);
        assert_eq!(update.state, SenderState::Default);
        assert_eq!(update.target_rate, snapshot);
    }

    #[test]
    fn compete_enter_and_exit() {
        let mut session = Session::new(CcfsController::default());
        session.steady(10);

        // Everything arrives, but behind a steadily growing queue.
        let mut competing = None;
        for k in 1..=30 {
            let rate_before = session.controller.target_rate(session.now);
            let update = session.period(1000, 10 * k, all).unwrap();
            if update.state == SenderState::Competing {
                competing = Some((k, rate_before, update));
                break;
            }
        }
        let (k, rate_before, update) = competing.expect("competition never detected");
        // More than 2000 ms of increase with over 150 ms of queue delay.
        assert_eq!(k, 22);
        assert_eq!(update.target_queue_delay, TimeDelta::from_millis(100));
        assert_eq!(
            update.target_rate,
            (rate_before * 1.3).clamped(
                DataRate::from_kilobits_per_sec(150),
                DataRate::from_kilobits_per_sec(1500)
            )
        );

        // Competition is held until the queue has been quiet for the whole
        // window and the compete timer ran out.
        let mut periods = 0;
        loop {
            periods += 1;
            assert!(periods <= 60, "competition never ended");

            let update = session.period(1000, 0, all).unwrap();
            if update.state != SenderState::Competing {
                assert_eq!(update.state, SenderState::Default);
                assert_eq!(update.target_queue_delay, TimeDelta::from_millis(50));
                assert_eq!(session.controller.stats().last_event, ControlEvent::StopCompete);
                break;
            }
        }
        assert!(periods > 40);
    }

    #[test]
    fn competing_rolls_back_inflated_estimate() {
        let mut session = Session::new(CcfsController::default());
        session.steady(10);
        for k in 1..=22 {
            session.period(1000, 10 * k, all).unwrap();
        }
        assert_eq!(session.controller.state(), SenderState::Competing);
        let estimate = session.controller.estimated_bandwidth().unwrap();

        // Twice the bytes come back while the queue is 2.3x the target.
        let update = session.period(2000, 230, all).unwrap();
        assert_eq!(update.state, SenderState::Competing);
        assert!(session.controller.stats().qd_fraction >= 1.5);
        assert_eq!(update.estimated_bandwidth, Some(estimate));

        // Below the roll-back threshold the growth is kept.
        let update = session.period(2000, 100, all).unwrap();
        assert_eq!(update.state, SenderState::Competing);
        assert!(update.estimated_bandwidth.unwrap() > estimate);
    }

    #[test]
    fn late_acknowledgements_raise_fraction() {
        let mut controller = CcfsController::default();
        for seq in 0..10 {
            controller.on_sent_packet(SentPacket {
                ssrc: SSRC,
                sequence_number: seq,
                send_time: Timestamp::from_millis(1000 + 10 * seq as i64),
                size: DataSize::from_bytes(1000),
            });
        }

        // A 50 ms period ending just after seq 9 was sent; seqs 5 and 6 are
        // missing.
        let mut report = FeedbackReport::new(SSRC + 1);
        for seq in [0, 1, 2, 3, 4, 7, 8, 9] {
            report.add_feedback(SSRC, seq, 50 + 10 * seq as u64, 0);
        }
        report.set_report_time(141);
        report.set_monitored_duration(50);

        controller.on_feedback(Timestamp::from_millis(1200), &report).unwrap();

        // 8000 bytes acknowledged against 5000 sent within the period.
        assert_relative_eq!(controller.stats().br_fraction.unwrap(), 1.6);
    }

    #[test]
    fn no_estimate_holds_rate() {
        let config = CcfsConfig {
            start_bitrate: DataRate::from_kilobits_per_sec(300),
            ..Default::default()
        };
        let mut session = Session::new(CcfsController::new(config));

        // Far below the target rate and fully acknowledged: nothing to learn.
        session.period(10, 0, all).unwrap();
        let update = session.period(10, 60, all).unwrap();

        assert_eq!(update.estimated_bandwidth, None);
        assert!(session.controller.stats().qd_fraction > 1.05);
        assert_eq!(update.target_rate, DataRate::from_kilobits_per_sec(300));
    }

    #[test]
    fn reset_restores_start_state() {
        let mut session = Session::new(CcfsController::default());
        session.steady(5);
        assert!(session.controller.estimated_bandwidth().is_some());

        session.controller.reset();
        assert_eq!(session.controller.estimated_bandwidth(), None);
        assert_eq!(session.controller.state(), SenderState::Default);
        assert_eq!(
            session.controller.target_rate(session.now),
            DataRate::from_kilobits_per_sec(150)
        );
        assert_eq!(session.controller.stats().received_reports, 0);

        // Ledger entries survive, so reports keep matching.
        session.steady(1);
        assert!(session.controller.estimated_bandwidth().is_some());
    }

    #[derive(Default)]
    struct Monitor {
        queries: Vec<(u32, u16)>,
        pruned: Vec<Timestamp>,
    }

    struct SharedMonitor(Rc<RefCell<Monitor>>);

    impl NetworkQueueMonitor for SharedMonitor {
        fn query(&self, ssrc: u32, seq: u16) -> Option<QueueSnapshot> {
            self.0.borrow_mut().queries.push((ssrc, seq));
            Some(QueueSnapshot {
                at_time: Timestamp::from_millis(seq as i64),
                packets: 3,
                bytes: DataSize::from_bytes(3000),
                delay: TimeDelta::from_millis(30),
            })
        }

        fn prune(&mut self, oldest: Timestamp) {
            self.0.borrow_mut().pruned.push(oldest);
        }
    }

    #[test]
    fn queue_monitor_is_consulted() {
        let monitor = Rc::new(RefCell::new(Monitor::default()));
        let controller = CcfsController::default()
            .with_queue_monitor(Box::new(SharedMonitor(monitor.clone())));

        let mut session = Session::new(controller);
        session.steady(1);

        // 65530 + 9 wraps to 3.
        let monitor = monitor.borrow();
        assert_eq!(monitor.queries, [(SSRC, 3)]);
        assert_eq!(monitor.pruned, [Timestamp::from_millis(3)]);
    }

    #[test]
    fn congestion_signals_are_used() {
        let signals = FixedCongestionSignals {
            loss_rate: 0.05,
            ecn_rate: 0.01,
        };
        let controller = CcfsController::default().with_congestion_signals(Box::new(signals));

        let mut session = Session::new(controller);
        session.steady(1);

        let stats = session.controller.stats();
        assert_eq!(stats.loss_rate, 0.05);
        assert_eq!(stats.ecn_rate, 0.01);
    }

    #[test]
    fn lost_reports_are_counted() {
        let mut session = Session::new(CcfsController::default());
        session.steady(1);

        // Skip one report on the receiver.
        session.period(1000, 0, all).unwrap();
        session.generator.on_interval(session.now).unwrap();
        session.steady(1);

        assert_eq!(session.controller.stats().lost_reports, 1);
    }
}
