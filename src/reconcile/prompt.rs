//! 种子指令：告诉决策模型如何比对与更新库存

/// 匹配规则（顺序即优先级）
pub const MATCHING_RULES: [&str; 5] = [
    "Account for every observed item: each one must lead to exactly one add_item or update_item call, or be explicitly judged unchanged. Never silently drop an observation.",
    "Match observed items to prior items primarily by name and category. fetch_item_image is only a secondary disambiguation step, never a replacement for name/category matching.",
    "A prior item that does not appear among the observed items is a delete candidate: call delete_item, or state in your final reply why it is retained.",
    "An observed item with no plausible prior match must be added with add_item. When in doubt, add rather than ignore.",
    "An observed item that matches a prior item but differs in any field (amount, position, freshness, expiry, ...) must be updated with update_item, sending only the changed fields. Identical items need no action.",
];

/// 构造种子指令；observed_count 写进指令，便于模型核对是否逐条处理
pub fn reconcile_instructions(observed_count: usize) -> String {
    let rules = MATCHING_RULES
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{}. {}", i + 1, r))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "You are the inventory agent of a smart fridge. Reconcile the prior inventory snapshot \
         with the items observed in the latest photo, using only the provided tools.\n\n\
         Step 1: compare the prior snapshot with the observed items and decide which ones are the same physical item.\n\
         Step 2: apply the database changes with the tools, following these rules:\n{rules}\n\n\
         There are {observed_count} observed items in this batch; handle all of them. \
         When every change is applied, reply without tool calls and give a short summary of what was added, \
         updated, deleted, left unchanged, and any prior item kept on purpose with the reason."
    )
}
