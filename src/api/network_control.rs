/*
 *  Copyright (c) 2018 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use super::{
    transport::{ControlUpdate, SentPacket},
    units::{DataRate, Timestamp},
};
use crate::{rtp_rtcp::FeedbackReport, Result};

// NetworkControllerInterface is implemented by network controllers. A network
// controller uses information about sent packets and receiver feedback to
// estimate the available bandwidth and pick a send rate. Network controllers
// do not guarantee thread safety, the interface must be used in a
// non-concurrent fashion.
pub trait NetworkControllerInterface {
    // Called when a packet is sent on the network.
    fn on_sent_packet(&mut self, sent_packet: SentPacket);
    // Called with a receiver feedback report. A report that cannot be matched
    // against the sent packets is rejected and leaves the estimates untouched.
    fn on_feedback(&mut self, at_time: Timestamp, report: &FeedbackReport)
        -> Result<ControlUpdate>;
    // The rate the sender should currently pace at.
    fn target_rate(&self, at_time: Timestamp) -> DataRate;
    // Starts a new session with the initial rate and empty estimators.
    fn reset(&mut self);
}
