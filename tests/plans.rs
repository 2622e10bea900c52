use std::path::Path;

use capture_agent::event::EventKind;
use capture_agent::probes::{
    BashProbe, CaptureMode, HookTarget, LibraryFlavor, TcDirection, TlsProbe,
};

fn functions(targets: impl Iterator<Item = HookTarget>) -> Vec<String> {
    targets
        .filter_map(|t| match t {
            HookTarget::Symbol { function, .. } => Some(function),
            HookTarget::Interface { .. } => None,
        })
        .collect()
}

#[test]
fn bash_plan_is_complete() {
    let plan = BashProbe::plan_for(Path::new("/usr/lib/libreadline.so.8"));

    assert_eq!(plan.points.len(), 2);
    assert_eq!(
        plan.points.iter().map(|p| p.section.as_str()).collect::<Vec<_>>(),
        vec!["uretprobe/bash_readline", "uretprobe/bash_retval"]
    );
    assert_eq!(
        functions(plan.points.into_iter().map(|p| p.target)),
        vec!["readline", "execute_command"]
    );
    assert_eq!(plan.channels, vec!["events"]);
}

#[test]
fn openssl_uprobe_plan_is_complete() {
    let binary = Path::new("/usr/lib/libssl.so.3");
    let flavor = LibraryFlavor::from_bytecode("openssl_3_0_0_kern.o".to_string());
    let plan = TlsProbe::uprobe_plan(binary, &flavor);

    assert_eq!(
        plan.programs().collect::<Vec<_>>(),
        vec![
            "probe_entry_SSL_write",
            "probe_ret_SSL_write",
            "probe_entry_SSL_read",
            "probe_ret_SSL_read",
            "probe_ssl_master_key",
        ]
    );
    assert_eq!(
        functions(plan.points.iter().map(|p| p.target.clone())),
        vec!["SSL_write", "SSL_write", "SSL_read", "SSL_read", "SSL_write"]
    );
    assert!(plan.points.iter().all(|p| matches!(
        &p.target,
        HookTarget::Symbol { binary: b, .. } if b == binary
    )));
    assert_eq!(
        plan.channels,
        vec!["tls_events", "connect_events", "mastersecret_events"]
    );
}

#[test]
fn boringssl_hooks_ssl_in_init() {
    let flavor = LibraryFlavor::from_bytecode("boringssl_a_14_kern.o".to_string());
    let plan = TlsProbe::uprobe_plan(Path::new("/system/lib64/libssl.so"), &flavor);

    let master = plan.points.last().unwrap();
    assert_eq!(master.section, "uprobe/SSL_write_key");
    assert_eq!(
        functions(std::iter::once(master.target.clone())),
        vec!["SSL_in_init"]
    );

    let bindings = TlsProbe::channel_bindings(CaptureMode::Uprobe, &flavor);
    assert_eq!(
        bindings,
        vec![
            ("tls_events", EventKind::SslData),
            ("connect_events", EventKind::Connect),
            ("mastersecret_events", EventKind::MasterSecretBssl),
        ]
    );
}

#[test]
fn tc_plan_mirrors_both_directions() {
    let flavor = LibraryFlavor::from_bytecode("openssl_1_1_1j_kern.o".to_string());
    let plan = TlsProbe::tc_plan(Path::new("/usr/bin/curl"), &flavor, "wlan0");

    assert_eq!(
        plan.points[..2]
            .iter()
            .map(|p| (p.program.as_str(), p.target.clone()))
            .collect::<Vec<_>>(),
        vec![
            (
                "egress_cls_func",
                HookTarget::Interface {
                    ifname: "wlan0".to_string(),
                    direction: TcDirection::Egress
                }
            ),
            (
                "ingress_cls_func",
                HookTarget::Interface {
                    ifname: "wlan0".to_string(),
                    direction: TcDirection::Ingress
                }
            ),
        ]
    );
    assert_eq!(plan.points[2].program, "probe_ssl_master_key");
    assert_eq!(plan.interfaces(), vec!["wlan0"]);
    assert_eq!(plan.channels, vec!["skb_events", "mastersecret_events"]);

    let bindings = TlsProbe::channel_bindings(CaptureMode::Tc, &flavor);
    let channels: Vec<&str> = bindings.iter().map(|(c, _)| *c).collect();
    assert_eq!(channels, plan.channels);
    assert_eq!(bindings[1].1, EventKind::MasterSecret);
}
