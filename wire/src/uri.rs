//! MeshCoP CoAP URI paths.

/// LEAD_PET.req: commissioner petition.
pub const PETITION: &str = "c/lp";
/// LEAD_KA.req: keep-alive / resign.
pub const KEEP_ALIVE: &str = "c/la";
/// MGMT_COMMISSIONER_GET.req.
pub const COMMISSIONER_GET: &str = "c/cg";
/// MGMT_COMMISSIONER_SET.req.
pub const COMMISSIONER_SET: &str = "c/cs";
/// MGMT_ACTIVE_GET.req.
pub const ACTIVE_GET: &str = "c/ag/ag";
/// MGMT_ACTIVE_SET.req.
pub const ACTIVE_SET: &str = "c/as";
/// MGMT_PENDING_GET.req.
pub const PENDING_GET: &str = "c/pg";
/// MGMT_PENDING_SET.req.
pub const PENDING_SET: &str = "c/ps";
/// MGMT_BBR_GET.req.
pub const BBR_GET: &str = "c/bg";
/// MGMT_BBR_SET.req.
pub const BBR_SET: &str = "c/bs";
/// MGMT_ED_REPORT.ans: inbound energy report.
pub const ENERGY_REPORT: &str = "c/er";
/// MGMT_PANID_CONFLICT.ans: inbound PAN ID conflict.
pub const PANID_CONFLICT: &str = "c/ur";
/// MGMT_PANID_QUERY.qry.
pub const PANID_QUERY: &str = "c/pq";
/// MGMT_ED_SCAN.qry.
pub const ENERGY_SCAN: &str = "c/es";
/// MGMT_ANNOUNCE_BEGIN.ntf.
pub const ANNOUNCE_BEGIN: &str = "c/ab";
/// MGMT_DATASET_CHANGED.ntf: inbound dataset-changed notification.
pub const DATASET_CHANGED: &str = "c/dc";
/// RLY_RX.ntf: inbound relayed joiner traffic.
pub const RELAY_RX: &str = "c/rx";
/// RLY_TX.ntf: outbound relayed joiner traffic.
pub const RELAY_TX: &str = "c/tx";
/// JOIN_FIN.req: joiner finalize (served on the joiner session).
pub const JOINER_FINALIZE: &str = "c/jf";
/// JOIN_ENT.ntf: joiner entrust, carries the KEK.
pub const JOINER_ENTRUST: &str = "c/je";
/// MLR.req: multicast listener registration.
pub const MLR: &str = "n/mr";
/// MGMT_REENROLL.req (CCM).
pub const REENROLL: &str = "c/re";
/// MGMT_DOMAIN_RESET.req (CCM).
pub const DOMAIN_RESET: &str = "c/rt";
/// MGMT_NET_MIGRATE.req (CCM).
pub const NET_MIGRATE: &str = "c/nm";
/// COM_TOK.req: commissioner token request (CCM).
pub const TOKEN_REQUEST: &str = "c/tr";
