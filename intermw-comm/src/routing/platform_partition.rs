/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Grouping of device targets by owning platform.

use crate::model::IoTDevice;
use std::collections::BTreeMap;

/// Groups devices by `hosted_by`, keeping the caller's order inside each group.
pub(crate) fn partition_by_platform(devices: &[IoTDevice]) -> BTreeMap<String, Vec<IoTDevice>> {
    let mut partitions: BTreeMap<String, Vec<IoTDevice>> = BTreeMap::new();
    for device in devices {
        partitions
            .entry(device.hosted_by.clone())
            .or_default()
            .push(device.clone());
    }
    partitions
}

/// Device ids of one partition.
pub(crate) fn device_ids(devices: &[IoTDevice]) -> Vec<String> {
    devices.iter().map(|device| device.device_id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::{device_ids, partition_by_platform};
    use crate::model::IoTDevice;

    #[test]
    fn devices_are_grouped_per_platform() {
        let devices: Vec<IoTDevice> = (0..14)
            .map(|n| IoTDevice::new(format!("d{n}"), if n % 2 == 0 { "p-a" } else { "p-b" }))
            .collect();

        let partitions = partition_by_platform(&devices);

        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions["p-a"].len(), 7);
        assert_eq!(device_ids(&partitions["p-b"])[0], "d1");
    }

    #[test]
    fn empty_input_yields_no_partitions() {
        assert!(partition_by_platform(&[]).is_empty());
    }
}
