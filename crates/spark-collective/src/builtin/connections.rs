use crate::{decision::Algorithm, types::Rank};

/// 本成员在给定算法下需要建立端点的对端集合。
///
/// # 教案式说明
/// - **意图 (Why)**：端点按需创建，只为算法真正通信的对端建连；
/// - **执行 (How)**：
///   - 环：前驱与后继；
///   - 递归倍增：每一轮的异或伙伴 `me ^ 2^k`（落在组内的部分）；
///   - 二项树：以根为原点的相对 rank 上的父节点与子节点；
///   - 其他算法：除自身外的全部成员；
/// - **契约 (What)**：结果升序、无重复、不含自身；单成员组返回空集合。
pub fn connection_set(algorithm: Algorithm, members: u32, me: Rank, root: Rank) -> Vec<Rank> {
    if members <= 1 {
        return Vec::new();
    }
    // 成员数可达 `u32::MAX`，中间量一律在 u64 中计算。
    let members = u64::from(members);
    let me = u64::from(me.0) % members;
    let mut peers: Vec<u64> = match algorithm {
        Algorithm::Ring => vec![(me + members - 1) % members, (me + 1) % members],
        Algorithm::RecursiveDoubling => {
            let mut peers = Vec::new();
            let mut mask = 1u64;
            while mask < members {
                let partner = me ^ mask;
                if partner < members {
                    peers.push(partner);
                }
                mask <<= 1;
            }
            peers
        }
        Algorithm::BinomialTree => binomial_neighbours(members, me, u64::from(root.0) % members),
        Algorithm::Linear
        | Algorithm::KnomialTree
        | Algorithm::TopologyAware
        | Algorithm::Bruck
        | Algorithm::Pairwise => (0..members).collect(),
    };
    peers.retain(|peer| *peer != me);
    peers.sort_unstable();
    peers.dedup();
    peers
        .into_iter()
        .filter_map(|peer| u32::try_from(peer).ok())
        .map(Rank)
        .collect()
}

fn binomial_neighbours(members: u64, me: u64, root: u64) -> Vec<u64> {
    let relative = (me + members - root) % members;
    let absolute = |relative: u64| (relative + root) % members;
    let mut peers = Vec::new();

    if relative != 0 {
        peers.push(absolute(relative & (relative - 1)));
    }
    let lowest = if relative == 0 {
        u64::MAX
    } else {
        relative & relative.wrapping_neg()
    };
    let mut mask = 1u64;
    while mask < lowest && mask < members {
        let child = relative + mask;
        if child < members {
            peers.push(absolute(child));
        }
        mask <<= 1;
    }
    peers
}
